//! SSM offline controller host
//!
//! Installs and activates the offline cache controller against a live portal,
//! then runs the requested fetches, push and notification click through it.
//! Every step prints one JSON line on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use serde_json::json;
use ssm_common::{init_logging, LogConfig, LogFormat};
use ssm_net::{HttpFetcher, LoaderConfig, Request};
use ssm_sw::{
    CacheStore, ControllerConfig, ControllerContext, ControllerEvent, EventOutcome, FetchOutcome,
    MemoryCacheStore, Registration, SqliteCacheStore,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "ssm-offline")]
#[command(about = "Run the offline cache controller against a portal")]
struct Args {
    /// Controller config (JSON); built-in defaults when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite cache store; an in-memory store when absent
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// Portal path or URL to fetch through the controller (repeatable)
    #[arg(long = "fetch", value_name = "URL")]
    fetches: Vec<String>,

    /// Send fetches as HTML navigations
    #[arg(long)]
    html: bool,

    /// Push payload (JSON) to deliver after the fetches
    #[arg(long, value_name = "JSON")]
    push: Option<String>,

    /// Click the notification shown by --push
    #[arg(long, requires = "push")]
    click: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig::default().with_format(args.log_format));

    let config = match args.config {
        Some(ref path) => ControllerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let scope = config.origin_url().context("invalid origin")?;
    info!(
        origin = %scope,
        version = %config.version,
        db = ?args.db,
        fetches = args.fetches.len(),
        "Starting SSM offline controller host"
    );

    let store: Arc<dyn CacheStore> = match args.db {
        Some(ref path) => Arc::new(
            SqliteCacheStore::open(path)
                .with_context(|| format!("opening cache store {}", path.display()))?,
        ),
        None => Arc::new(MemoryCacheStore::new()),
    };
    let fetcher = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
    let (context, mut events) = ControllerContext::new(store.clone(), fetcher);
    let mut registration = Registration::new(scope, context);

    let static_cache = config.static_cache_name();
    let dynamic_cache = config.dynamic_cache_name();
    let version = config.version.clone();
    if let Err(err) = registration.install_and_activate(config).await {
        println!(
            "{}",
            json!({ "step": "install", "status": "fail", "reason": err.to_string() })
        );
        report_events(&mut events);
        return Err(err.into());
    }
    println!(
        "{}",
        json!({
            "step": "install",
            "status": "ok",
            "version": version,
            "static_cache": static_cache,
            "dynamic_cache": dynamic_cache,
            "caches": store.keys()?,
        })
    );

    for target in &args.fetches {
        let url = registration
            .scope
            .join(target)
            .with_context(|| format!("invalid fetch target {target}"))?;
        fetch(&registration, url, args.html).await?;
    }

    if let Some(ref payload) = args.push {
        let outcome = registration
            .push(Some(Bytes::from(payload.clone())))
            .await?;
        match outcome {
            EventOutcome::NotificationShown(id) => {
                println!(
                    "{}",
                    json!({ "step": "push", "status": "shown", "notification": id.raw() })
                );
                if args.click {
                    click(&registration, id).await?;
                }
            }
            EventOutcome::PushDropped(reason) => {
                println!(
                    "{}",
                    json!({ "step": "push", "status": "dropped", "reason": reason })
                );
            }
            other => bail!("unexpected push outcome: {other:?}"),
        }
    }

    report_events(&mut events);
    Ok(())
}

async fn fetch(registration: &Registration, url: Url, html: bool) -> anyhow::Result<()> {
    let request = if html {
        Request::navigate(url.clone())
    } else {
        Request::get(url.clone())
    };

    let dispatched = registration.handle_fetch(request.clone()).await?;
    let outcome = match dispatched.outcome {
        EventOutcome::Fetch(outcome) => outcome,
        other => bail!("unexpected fetch outcome: {other:?}"),
    };

    let report = match outcome {
        FetchOutcome::PassThrough => match registration.context().fetcher.fetch(&request).await {
            Ok(response) => json!({
                "status": response.status,
                "bytes": response.body.len(),
                "content_type": response.content_type(),
            }),
            Err(err) => json!({ "error": err.to_string() }),
        },
        ref served => match served.response() {
            Some(response) => json!({
                "status": response.status,
                "bytes": response.body.len(),
                "content_type": response.content_type(),
            }),
            None => json!({ "error": "no response" }),
        },
    };

    // Let the cache write land before the next step.
    if let Err(err) = dispatched.lifetime.settled().await {
        warn!(%url, error = %err, "Background work for fetch failed");
    }

    println!(
        "{}",
        json!({
            "step": "fetch",
            "url": url.as_str(),
            "source": outcome.source(),
            "response": report,
        })
    );
    Ok(())
}

async fn click(registration: &Registration, id: ssm_sw::NotificationId) -> anyhow::Result<()> {
    match registration.notification_click(id).await? {
        EventOutcome::NotificationClicked { url, .. } => {
            println!(
                "{}",
                json!({ "step": "click", "notification": id.raw(), "url": url.as_str() })
            );
            Ok(())
        }
        other => bail!("unexpected click outcome: {other:?}"),
    }
}

fn report_events(events: &mut UnboundedReceiver<ControllerEvent>) {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(format!("{event:?}"));
    }
    println!("{}", json!({ "step": "events", "events": drained }));
}
