//! Controller versions and their lifecycle on one origin.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use ssm_net::{Origin, Request, Response};
use tracing::{info, warn};
use url::Url;

use crate::config::ControllerConfig;
use crate::controller::{ControllerContext, OfflineController};
use crate::event::{
    ControllerEvent, Dispatched, Event, EventOutcome, FetchEvent, FetchOutcome,
    NotificationClickEvent, PushEvent,
};
use crate::push::NotificationId;
use crate::{Result, SwError};

/// Unique identifier for a controller version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionId(u64);

impl VersionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Controller version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and intercepting requests.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// One deployed version of the controller.
#[derive(Clone)]
pub struct ControllerVersion {
    /// Unique ID.
    pub id: VersionId,

    /// Current state.
    pub state: VersionState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,

    controller: OfflineController,
}

impl ControllerVersion {
    fn new(controller: OfflineController) -> Self {
        Self {
            id: VersionId::new(),
            state: VersionState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
            controller,
        }
    }

    /// Version marker from the configuration.
    pub fn version(&self) -> &str {
        &self.controller.config().version
    }

    pub fn controller(&self) -> &OfflineController {
        &self.controller
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == VersionState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == VersionState::Redundant
    }

    fn set_state(&mut self, state: VersionState, context: &ControllerContext) {
        self.state = state;
        self.state_changed_at = Instant::now();
        info!(version = %self.version(), ?state, "Controller state changed");
        context.emit(ControllerEvent::StateChange {
            version_id: self.id,
            version: self.version().to_string(),
            new_state: state,
        });
    }
}

impl std::fmt::Debug for ControllerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerVersion")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("state", &self.state)
            .field("error", &self.error)
            .finish()
    }
}

/// The controller registration of one origin.
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Installing version.
    pub installing: Option<ControllerVersion>,

    /// Waiting version (installed but not active).
    pub waiting: Option<ControllerVersion>,

    /// Active version.
    pub active: Option<ControllerVersion>,

    context: ControllerContext,
}

impl Registration {
    /// Create an empty registration.
    pub fn new(scope: Url, context: ControllerContext) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            context,
        }
    }

    pub fn context(&self) -> &ControllerContext {
        &self.context
    }

    /// Get the active version.
    pub fn get_active(&self) -> Option<&ControllerVersion> {
        self.active.as_ref()
    }

    /// Install a new version. On failure the version becomes redundant and
    /// whatever was active stays active.
    pub async fn update(&mut self, config: ControllerConfig) -> Result<VersionId> {
        let origin = Origin::from_url(&config.origin_url()?);
        if !origin.same_origin(&Origin::from_url(&self.scope)) {
            return Err(SwError::Config(format!(
                "origin {} is outside scope {}",
                origin, self.scope
            )));
        }

        let controller = OfflineController::new(config, self.context.clone())?;
        let mut version = ControllerVersion::new(controller);
        let id = version.id;
        version.set_state(VersionState::Installing, &self.context);
        self.installing = Some(version.clone());

        let dispatched = version.controller.dispatch(Event::Install).await?;
        let result = dispatched.lifetime.settled().await;
        self.installing = None;

        match result {
            Ok(()) => {
                version.set_state(VersionState::Installed, &self.context);
                if let Some(mut replaced) = self.waiting.replace(version) {
                    replaced.set_state(VersionState::Redundant, &self.context);
                }
                Ok(id)
            }
            Err(err) => {
                warn!(error = %err, "Install failed, keeping previous version");
                version.error = Some(err.to_string());
                version.set_state(VersionState::Redundant, &self.context);
                Err(match err {
                    SwError::InstallFailed(_) => err,
                    other => SwError::InstallFailed(other.to_string()),
                })
            }
        }
    }

    /// Promote the waiting version and purge stale generations.
    pub async fn activate(&mut self) -> Result<()> {
        let mut version = self
            .waiting
            .take()
            .ok_or_else(|| SwError::State("no waiting version to activate".to_string()))?;

        version.set_state(VersionState::Activating, &self.context);
        let dispatched = version.controller.dispatch(Event::Activate).await?;
        if let Err(err) = dispatched.lifetime.settled().await {
            // Activation proceeds regardless; stale generations get another
            // chance on the next deploy.
            warn!(error = %err, "Activate work failed");
        }

        if let Some(mut old) = self.active.take() {
            old.set_state(VersionState::Redundant, &self.context);
        }
        version.set_state(VersionState::Activated, &self.context);
        self.active = Some(version);
        Ok(())
    }

    /// Install then immediately activate.
    pub async fn install_and_activate(&mut self, config: ControllerConfig) -> Result<VersionId> {
        let id = self.update(config).await?;
        self.activate().await?;
        Ok(id)
    }

    /// Run a request through the active version.
    pub async fn handle_fetch(&self, request: Request) -> Result<Dispatched> {
        match self.active {
            Some(ref version) => {
                version
                    .controller
                    .dispatch(Event::Fetch(FetchEvent::new(request)))
                    .await
            }
            None => Ok(Dispatched {
                kind: crate::event::EventKind::Fetch,
                outcome: EventOutcome::Fetch(FetchOutcome::PassThrough),
                lifetime: Default::default(),
            }),
        }
    }

    /// Fetch as the page would see it: intercepted when possible, otherwise
    /// sent to the network untouched. `Ok(None)` is a failed fetch with no
    /// fallback.
    pub async fn fetch(&self, request: Request) -> Result<Option<Response>> {
        let dispatched = self.handle_fetch(request.clone()).await?;
        match dispatched.outcome {
            EventOutcome::Fetch(FetchOutcome::PassThrough) => {
                Ok(Some(self.context.fetcher.fetch(&request).await?))
            }
            EventOutcome::Fetch(outcome) => Ok(outcome.into_response()),
            other => Err(SwError::State(format!(
                "unexpected outcome for fetch: {other:?}"
            ))),
        }
    }

    /// Deliver a push message to the active version.
    pub async fn push(&self, data: Option<Bytes>) -> Result<EventOutcome> {
        let version = self.require_active()?;
        let dispatched = version
            .controller
            .dispatch(Event::Push(PushEvent { data }))
            .await?;
        dispatched.lifetime.settled().await?;
        Ok(dispatched.outcome)
    }

    /// Deliver a notification click to the active version and wait until the
    /// window is open.
    pub async fn notification_click(&self, notification_id: NotificationId) -> Result<EventOutcome> {
        let version = self.require_active()?;
        let dispatched = version
            .controller
            .dispatch(Event::NotificationClick(NotificationClickEvent { notification_id }))
            .await?;
        dispatched.lifetime.settled().await?;
        Ok(dispatched.outcome)
    }

    /// Unregister: every version becomes redundant.
    pub fn unregister(&mut self) {
        for slot in [&mut self.installing, &mut self.waiting, &mut self.active] {
            if let Some(mut version) = slot.take() {
                version.set_state(VersionState::Redundant, &self.context);
            }
        }
    }

    fn require_active(&self) -> Result<&ControllerVersion> {
        self.active
            .as_ref()
            .ok_or_else(|| SwError::State("no active version".to_string()))
    }
}
