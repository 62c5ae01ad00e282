//! Events delivered to a controller and what handling them produced.

use bytes::Bytes;
use ssm_net::{Request, Response};
use url::Url;

use crate::keepalive::KeepAlive;
use crate::push::NotificationId;
use crate::registration::{VersionId, VersionState};

/// Kind of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
}

/// A request intercepted on its way to the network.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

/// A message from the push transport.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    /// Push carrying `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// Push without a body.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The user activated a displayed notification.
#[derive(Debug, Clone, Copy)]
pub struct NotificationClickEvent {
    pub notification_id: NotificationId,
}

/// Everything a controller handles.
#[derive(Debug, Clone)]
pub enum Event {
    Install,
    Activate,
    Fetch(FetchEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Install => EventKind::Install,
            Event::Activate => EventKind::Activate,
            Event::Fetch(_) => EventKind::Fetch,
            Event::Push(_) => EventKind::Push,
            Event::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// How a fetch was answered.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the host sends the original request itself.
    PassThrough,
    /// Live network response, cached or not.
    Network(Response),
    /// Network failed; served from a cache generation.
    Cache(Response),
    /// Network failed on an HTML navigation; served the offline page.
    OfflineFallback(Response),
    /// Network failed and nothing applies; the caller sees a failed fetch.
    NoResponse,
}

impl FetchOutcome {
    /// The response handed back to the page, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Network(r) | FetchOutcome::Cache(r) | FetchOutcome::OfflineFallback(r) => {
                Some(r)
            }
            FetchOutcome::PassThrough | FetchOutcome::NoResponse => None,
        }
    }

    /// Take the response out.
    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Network(r) | FetchOutcome::Cache(r) | FetchOutcome::OfflineFallback(r) => {
                Some(r)
            }
            FetchOutcome::PassThrough | FetchOutcome::NoResponse => None,
        }
    }

    /// Short label for logs and reports.
    pub fn source(&self) -> &'static str {
        match self {
            FetchOutcome::PassThrough => "pass-through",
            FetchOutcome::Network(_) => "network",
            FetchOutcome::Cache(_) => "cache",
            FetchOutcome::OfflineFallback(_) => "offline-fallback",
            FetchOutcome::NoResponse => "none",
        }
    }
}

/// Immediate result of handling an event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// All work lives on the event lifetime (install, activate).
    Extended,
    Fetch(FetchOutcome),
    NotificationShown(NotificationId),
    /// The push could not be turned into a notification.
    PushDropped(String),
    /// The notification was closed; the window opens on the lifetime.
    NotificationClicked {
        notification_id: NotificationId,
        url: Url,
    },
}

/// A handled event: its outcome plus the lifetime still carrying any
/// background work.
#[derive(Debug)]
pub struct Dispatched {
    pub kind: EventKind,
    pub outcome: EventOutcome,
    pub lifetime: KeepAlive,
}

/// Notifications sent to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A controller version changed state.
    StateChange {
        version_id: VersionId,
        version: String,
        new_state: VersionState,
    },
    /// Stale generations were deleted on activation.
    CachesPurged { deleted: Vec<String> },
    NotificationShown { id: NotificationId, title: String },
    NotificationClosed { id: NotificationId },
    WindowOpened { client_id: String, url: Url },
    WindowFocused { client_id: String, url: Url },
}
