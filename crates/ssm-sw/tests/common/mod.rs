//! Shared fixtures: a scripted network and a ready registration.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use ssm_net::{Fetcher, NetError, Request, Response, ResponseType};
use ssm_sw::{
    CacheStore, ControllerConfig, ControllerContext, ControllerEvent, MemoryCacheStore,
    Registration,
};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

pub const ORIGIN: &str = "https://portal.example.edu/";

pub const OFFLINE_HTML: &str = "<h1>You are offline</h1>";

pub fn portal(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: Bytes,
    content_type: &'static str,
    response_type: ResponseType,
}

/// In-memory network with an on/off switch.
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Serve a same-origin response at `url`.
    pub fn serve(&self, url: &str, status: u16, body: &str) {
        self.serve_as(url, status, body, ResponseType::Basic);
    }

    /// Serve a response of a given type at `url`.
    pub fn serve_as(&self, url: &str, status: u16, body: &str, response_type: ResponseType) {
        let content_type = if url.ends_with(".css") {
            "text/css"
        } else if url.ends_with(".png") {
            "image/png"
        } else {
            "text/html"
        };
        self.routes.lock().unwrap().insert(
            Url::parse(url).unwrap().to_string(),
            Route {
                status,
                body: Bytes::from(body.to_string()),
                content_type,
                response_type,
            },
        );
    }

    /// Serve the default precache list.
    pub fn serve_assets(&self) {
        self.serve(portal("/static/imgs/annamalai.png").as_str(), 200, "PNG");
        self.serve(portal("/static/css/student_style.css").as_str(), 200, "body{}");
        self.serve(portal("/offline/").as_str(), 200, OFFLINE_HTML);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// URLs requested so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.to_string());

        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("network unreachable".to_string()));
        }

        let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        Ok(match route {
            Some(route) => Response {
                url: request.url.clone(),
                status: route.status,
                headers: Default::default(),
                body: route.body,
                response_type: route.response_type,
                redirected: false,
            }
            .with_header(CONTENT_TYPE, HeaderValue::from_static(route.content_type)),
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, "not found"),
        })
    }
}

pub struct Harness {
    pub registration: Registration,
    pub fetcher: Arc<ScriptedFetcher>,
    pub store: Arc<dyn CacheStore>,
    pub events: UnboundedReceiver<ControllerEvent>,
}

impl Harness {
    /// A registration over `store` with nothing installed yet.
    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        let fetcher = ScriptedFetcher::new();
        fetcher.serve_assets();
        let (context, events) = ControllerContext::new(store.clone(), fetcher.clone());
        Self {
            registration: Registration::new(Url::parse(ORIGIN).unwrap(), context),
            fetcher,
            store,
            events,
        }
    }

    /// A registration with version `v1` installed and active.
    pub async fn active() -> Self {
        Self::active_with(config()).await
    }

    pub async fn active_with(config: ControllerConfig) -> Self {
        let mut harness = Self::with_store(Arc::new(MemoryCacheStore::new()));
        harness
            .registration
            .install_and_activate(config)
            .await
            .unwrap();
        harness.drain_events();
        harness
    }

    /// Take every host notification sent so far.
    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn config() -> ControllerConfig {
    ControllerConfig::for_origin(ORIGIN)
}
