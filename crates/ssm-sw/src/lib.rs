//! # SSM Offline Controller
//!
//! Offline cache controller for the student portal, modelled on the
//! Service Worker lifecycle.
//!
//! ## Features
//!
//! - **Versioned caches**: a static generation filled at install time and a
//!   dynamic generation filled from successful responses
//! - **Lifecycle**: install, activate (stale generation purge), redundant
//! - **Fetch interception**: network first, cache as fallback, offline page
//!   for HTML navigations
//! - **Push**: notifications from JSON payloads, click opens or focuses a window
//! - **Keep-alive**: background work registered on an event outlives the caller
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing / waiting / active (ControllerVersion)
//!     │       └── OfflineController ── dispatch(Event) ──▶ Dispatched { outcome, lifetime }
//!     │
//!     └── ControllerContext (shared by every version)
//!             ├── CacheStore (memory or sqlite)
//!             │       └── generation name ──▶ CacheKey ──▶ CacheEntry
//!             ├── Fetcher
//!             ├── Clients
//!             └── Notifications
//! ```

use ssm_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod controller;
pub mod event;
pub mod keepalive;
pub mod push;
pub mod registration;
pub mod sqlite;

pub use cache::{Cache, CacheEntry, CacheKey, CacheStore, MemoryCacheStore};
pub use clients::{
    Client, ClientMatchOptions, ClientType, Clients, FrameType, VisibilityState, WindowAction,
};
pub use config::ControllerConfig;
pub use controller::{ControllerContext, OfflineController};
pub use event::{
    ControllerEvent, Dispatched, Event, EventKind, EventOutcome, FetchEvent, FetchOutcome,
    NotificationClickEvent, PushEvent,
};
pub use keepalive::KeepAlive;
pub use push::{
    Notification, NotificationData, NotificationId, NotificationOptions, Notifications,
    PushPayload,
};
pub use registration::{ControllerVersion, Registration, VersionId, VersionState};
pub use sqlite::SqliteCacheStore;

/// Errors that can occur in controller operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, SwError>;
