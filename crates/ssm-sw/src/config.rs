//! Controller configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use ssm_net::Origin;
use url::Url;

use crate::{Result, SwError};

/// Configuration of one controller version.
///
/// Bumping `version` renames both generations, so the next activation
/// purges everything cached by the previous deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Origin the controller serves, e.g. `https://portal.example.edu/`.
    pub origin: String,

    /// Common prefix of the generation names.
    pub cache_prefix: String,

    /// Version marker appended to the generation names.
    pub version: String,

    /// Assets fetched into the static generation at install time.
    pub precache: Vec<String>,

    /// Page served for HTML navigations that fail with nothing cached.
    pub offline_page: String,

    /// Icon used when a push payload has none.
    pub default_icon: String,

    /// Badge used when a push payload has none.
    pub default_badge: String,

    /// Vibration pattern for notifications, in milliseconds.
    pub vibrate: Vec<u32>,

    /// Cap on dynamic entries; `None` keeps everything.
    pub max_dynamic_entries: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000/".to_string(),
            cache_prefix: "au-it-dept".to_string(),
            version: "v1".to_string(),
            precache: vec![
                "/static/imgs/annamalai.png".to_string(),
                "/static/css/student_style.css".to_string(),
                "/offline/".to_string(),
            ],
            offline_page: "/offline/".to_string(),
            default_icon: "/static/imgs/annamalai.png".to_string(),
            default_badge: "/static/imgs/annamalai.png".to_string(),
            vibrate: vec![100, 50, 100],
            max_dynamic_entries: None,
        }
    }
}

impl ControllerConfig {
    /// Default configuration for an origin.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Default::default()
        }
    }

    /// Set the version marker.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Name of the static generation.
    pub fn static_cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Name of the dynamic generation.
    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-{}", self.cache_prefix, self.version)
    }

    /// Parsed origin URL.
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin)
            .map_err(|e| SwError::Config(format!("origin '{}': {e}", self.origin)))?;
        if Origin::from_url(&url).is_opaque() || !matches!(url.scheme(), "http" | "https") {
            return Err(SwError::Config(format!(
                "origin '{}' must be http or https",
                self.origin
            )));
        }
        Ok(url)
    }

    /// Resolve a path or absolute URL against the origin.
    pub fn resolve(&self, target: &str) -> Result<Url> {
        self.origin_url()?
            .join(target)
            .map_err(|e| SwError::Config(format!("cannot resolve '{target}': {e}")))
    }

    /// URL of the offline fallback page.
    pub fn offline_url(&self) -> Result<Url> {
        self.resolve(&self.offline_page)
    }

    /// Resolved precache list; always contains the offline page.
    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        let mut urls = self
            .precache
            .iter()
            .map(|asset| self.resolve(asset))
            .collect::<Result<Vec<_>>>()?;

        let offline = self.offline_url()?;
        if !urls.contains(&offline) {
            urls.push(offline);
        }
        Ok(urls)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(SwError::Config("cache_prefix is empty".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(SwError::Config("version is empty".to_string()));
        }
        if self.max_dynamic_entries == Some(0) {
            return Err(SwError::Config(
                "max_dynamic_entries must be at least 1".to_string(),
            ));
        }
        self.precache_urls()?;
        Ok(())
    }
}
