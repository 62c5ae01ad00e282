//! The offline cache controller and its event handlers.

use std::sync::Arc;

use futures::future::try_join_all;
use http::Method;
use ssm_net::{Fetcher, Origin, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::clients::{Clients, WindowAction};
use crate::config::ControllerConfig;
use crate::event::{
    ControllerEvent, Dispatched, Event, EventOutcome, FetchEvent, FetchOutcome,
    NotificationClickEvent, PushEvent,
};
use crate::keepalive::KeepAlive;
use crate::push::{NotificationOptions, Notifications, PushPayload};
use crate::{Result, SwError};

/// Resources shared by every controller version of one origin.
#[derive(Clone)]
pub struct ControllerContext {
    pub caches: Arc<dyn CacheStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: Arc<RwLock<Clients>>,
    pub notifications: Arc<RwLock<Notifications>>,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerContext {
    /// Create a context and the receiver for host notifications.
    pub fn new(
        caches: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                caches,
                fetcher,
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(Notifications::new())),
                events,
            },
            rx,
        )
    }

    /// Send a host notification; a closed receiver is not an error.
    pub(crate) fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}

/// One version of the offline cache controller.
#[derive(Clone)]
pub struct OfflineController {
    config: Arc<ControllerConfig>,
    origin: Origin,
    static_cache: String,
    dynamic_cache: String,
    context: ControllerContext,
}

impl OfflineController {
    /// Create a controller; fails on an invalid configuration.
    pub fn new(config: ControllerConfig, context: ControllerContext) -> Result<Self> {
        config.validate()?;
        let origin = Origin::from_url(&config.origin_url()?);

        Ok(Self {
            static_cache: config.static_cache_name(),
            dynamic_cache: config.dynamic_cache_name(),
            config: Arc::new(config),
            origin,
            context,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn context(&self) -> &ControllerContext {
        &self.context
    }

    /// Names of the generations this version keeps.
    pub fn current_generations(&self) -> [&str; 2] {
        [&self.static_cache, &self.dynamic_cache]
    }

    /// Run store calls on the blocking pool; the durable store does file I/O.
    async fn with_caches<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&dyn CacheStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let caches = self.context.caches.clone();
        tokio::task::spawn_blocking(move || work(caches.as_ref()))
            .await
            .map_err(|e| SwError::Task(e.to_string()))?
    }

    /// Handle one event.
    pub async fn dispatch(&self, event: Event) -> Result<Dispatched> {
        let kind = event.kind();
        let lifetime = KeepAlive::new();
        trace!(?kind, version = %self.config.version, "Dispatching event");

        let outcome = match event {
            Event::Install => self.on_install(&lifetime),
            Event::Activate => self.on_activate(&lifetime),
            Event::Fetch(event) => EventOutcome::Fetch(self.on_fetch(event, &lifetime).await),
            Event::Push(event) => self.on_push(event).await,
            Event::NotificationClick(event) => {
                self.on_notification_click(event, &lifetime).await?
            }
        };

        Ok(Dispatched {
            kind,
            outcome,
            lifetime,
        })
    }

    // ==================== Install ====================

    fn on_install(&self, lifetime: &KeepAlive) -> EventOutcome {
        let controller = self.clone();
        lifetime.wait_until(async move { controller.precache().await });
        EventOutcome::Extended
    }

    /// Fetch every listed asset and store them together. The generation is
    /// only created once all of them succeed.
    async fn precache(&self) -> Result<()> {
        let urls = self.config.precache_urls()?;
        info!(cache = %self.static_cache, assets = urls.len(), "Precaching assets");

        let fetches = urls.into_iter().map(|url| {
            let fetcher = self.context.fetcher.clone();
            async move {
                let request = Request::get(url);
                let response = fetcher
                    .fetch(&request)
                    .await
                    .map_err(|e| SwError::InstallFailed(format!("{}: {e}", request.url)))?;
                if !response.ok() {
                    return Err(SwError::InstallFailed(format!(
                        "{}: status {}",
                        request.url, response.status
                    )));
                }
                Ok(CacheEntry::from_response(&request, &response))
            }
        });

        let entries = try_join_all(fetches).await?;
        let name = self.static_cache.clone();
        self.with_caches(move |caches| {
            entries
                .into_iter()
                .try_for_each(|entry| caches.put(&name, entry))
        })
        .await
    }

    // ==================== Activate ====================

    fn on_activate(&self, lifetime: &KeepAlive) -> EventOutcome {
        let controller = self.clone();
        lifetime.wait_until(async move { controller.purge_stale_generations().await });
        EventOutcome::Extended
    }

    async fn purge_stale_generations(&self) -> Result<()> {
        let keep = [self.static_cache.clone(), self.dynamic_cache.clone()];
        let dynamic = self.dynamic_cache.clone();

        let deleted = self
            .with_caches(move |caches| {
                let mut deleted = Vec::new();
                for name in caches.keys()? {
                    if keep.contains(&name) {
                        continue;
                    }
                    if caches.delete(&name)? {
                        deleted.push(name);
                    }
                }
                // Both current generations exist from activation on.
                caches.open(&dynamic)?;
                Ok(deleted)
            })
            .await?;

        if !deleted.is_empty() {
            info!(?deleted, "Deleted stale cache generations");
            self.context
                .emit(ControllerEvent::CachesPurged { deleted });
        }
        Ok(())
    }

    // ==================== Fetch ====================

    async fn on_fetch(&self, event: FetchEvent, lifetime: &KeepAlive) -> FetchOutcome {
        let request = event.request;

        if !request.origin().same_origin(&self.origin) {
            trace!(url = %request.url, "Cross-origin request, not intercepting");
            return FetchOutcome::PassThrough;
        }

        match self.context.fetcher.fetch(&request).await {
            Ok(response) => {
                if !response.is_cacheable() {
                    trace!(
                        url = %request.url,
                        status = response.status,
                        response_type = ?response.response_type,
                        "Response not cacheable"
                    );
                    return FetchOutcome::Network(response);
                }

                if request.method == Method::GET {
                    let entry = CacheEntry::from_response(&request, &response);
                    let controller = self.clone();
                    lifetime.wait_until(async move {
                        controller.store_dynamic(entry).await;
                        Ok(())
                    });
                }

                FetchOutcome::Network(response)
            }
            Err(err) => {
                debug!(url = %request.url, error = %err, "Network failed, trying caches");
                self.fallback(&request).await
            }
        }
    }

    /// Write failures are swallowed; they never gate the response.
    async fn store_dynamic(&self, entry: CacheEntry) {
        let url = entry.url.clone();
        let name = self.dynamic_cache.clone();
        let max = self.config.max_dynamic_entries;

        let written = self
            .with_caches(move |caches| {
                caches.put(&name, entry)?;
                match max {
                    Some(max) => caches.trim(&name, max),
                    None => Ok(0),
                }
            })
            .await;

        match written {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, ?max, "Evicted oldest dynamic entries"),
            Err(err) => debug!(%url, error = %err, "Dynamic cache write failed"),
        }
    }

    async fn fallback(&self, request: &Request) -> FetchOutcome {
        if let Some(response) = self.lookup(CacheKey::from_request(request)).await {
            debug!(url = %request.url, "Serving from cache");
            return FetchOutcome::Cache(response);
        }

        if request.accepts_html() {
            let offline = match self.config.offline_url() {
                Ok(url) => self.lookup(CacheKey::get(&url)).await,
                Err(_) => None,
            };
            if let Some(response) = offline {
                info!(url = %request.url, "Serving offline page");
                return FetchOutcome::OfflineFallback(response);
            }
        }

        debug!(url = %request.url, "No cached response");
        FetchOutcome::NoResponse
    }

    async fn lookup(&self, key: CacheKey) -> Option<Response> {
        let url = key.url.clone();
        let found = self
            .with_caches(move |caches| {
                caches
                    .match_any(&key)
                    .and_then(|entry| entry.map(|e| e.to_response()).transpose())
            })
            .await;
        match found {
            Ok(response) => response,
            Err(err) => {
                warn!(%url, error = %err, "Cache lookup failed");
                None
            }
        }
    }

    // ==================== Push ====================

    async fn on_push(&self, event: PushEvent) -> EventOutcome {
        let Some(data) = event.data else {
            debug!("Push without data, ignoring");
            return EventOutcome::PushDropped("empty push".to_string());
        };

        let payload = match PushPayload::parse(&data) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Dropping malformed push payload");
                return EventOutcome::PushDropped(err.to_string());
            }
        };

        let options = NotificationOptions::from_payload(&payload, &self.config);
        let id = self
            .context
            .notifications
            .write()
            .await
            .show(payload.title.clone(), options);

        debug!(id = id.raw(), title = %payload.title, "Notification shown");
        self.context.emit(ControllerEvent::NotificationShown {
            id,
            title: payload.title,
        });
        EventOutcome::NotificationShown(id)
    }

    // ==================== Notification Click ====================

    async fn on_notification_click(
        &self,
        event: NotificationClickEvent,
        lifetime: &KeepAlive,
    ) -> Result<EventOutcome> {
        let id = event.notification_id;
        let notification = self
            .context
            .notifications
            .write()
            .await
            .close(id)
            .ok_or_else(|| SwError::NotFound(format!("notification {}", id.raw())))?;
        self.context.emit(ControllerEvent::NotificationClosed { id });

        let url = self.config.resolve(&notification.options.data.url)?;
        let context = self.context.clone();
        let target = url.clone();
        lifetime.wait_until(async move {
            let (client, action) = context.clients.write().await.open_window(target)?;
            info!(client = %client.id, url = %client.url, ?action, "Notification click handled");
            context.emit(match action {
                WindowAction::Opened => ControllerEvent::WindowOpened {
                    client_id: client.id,
                    url: client.url,
                },
                WindowAction::Focused => ControllerEvent::WindowFocused {
                    client_id: client.id,
                    url: client.url,
                },
            });
            Ok(())
        });

        Ok(EventOutcome::NotificationClicked {
            notification_id: id,
            url,
        })
    }
}

