//! Push payloads and the notifications they produce.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::ControllerConfig;
use crate::Result;

/// JSON body of a push message.
///
/// The portal backend sends the title under `head`; both spellings are
/// accepted. Optional fields may be missing, `null` or empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(alias = "head")]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse a push message body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Metadata attached to a notification and read back on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// Display options of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

impl NotificationOptions {
    /// Options for a payload, with configured defaults for anything missing
    /// or empty.
    pub fn from_payload(payload: &PushPayload, config: &ControllerConfig) -> Self {
        Self {
            body: payload.body.clone().unwrap_or_default(),
            icon: non_empty(&payload.icon).unwrap_or_else(|| config.default_icon.clone()),
            badge: non_empty(&payload.badge).unwrap_or_else(|| config.default_badge.clone()),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                url: non_empty(&payload.url).unwrap_or_else(|| "/".to_string()),
            },
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|s| !s.is_empty())
}

/// Unique identifier for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A displayed notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
    pub shown_at: Instant,
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: HashMap<NotificationId, Notification>,
}

impl Notifications {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification.
    pub fn show(&mut self, title: impl Into<String>, options: NotificationOptions) -> NotificationId {
        let id = NotificationId::new();
        self.shown.insert(
            id,
            Notification {
                id,
                title: title.into(),
                options,
                shown_at: Instant::now(),
            },
        );
        id
    }

    /// Look up a displayed notification.
    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Close a notification, returning it if it was displayed.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    /// Displayed notifications, oldest first.
    pub fn list(&self) -> Vec<&Notification> {
        let mut shown: Vec<_> = self.shown.values().collect();
        shown.sort_by_key(|n| n.id);
        shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_payload() {
        let payload = PushPayload::parse(
            br#"{"title":"Grades Posted","body":"Your result is available","url":"/results/42"}"#,
        )
        .unwrap();
        assert_eq!(payload.title, "Grades Posted");
        assert_eq!(payload.body.as_deref(), Some("Your result is available"));
        assert_eq!(payload.url.as_deref(), Some("/results/42"));
        assert!(payload.icon.is_none());
    }

    #[test]
    fn test_parse_head_alias() {
        let payload = PushPayload::parse(
            br#"{"head":"Leave Request Update","body":"Approved","icon":"/static/imgs/annamalai.png"}"#,
        )
        .unwrap();
        assert_eq!(payload.title, "Leave Request Update");
        assert_eq!(payload.icon.as_deref(), Some("/static/imgs/annamalai.png"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(PushPayload::parse(b"not json").is_err());
        assert!(PushPayload::parse(br#"{"body":"no title"}"#).is_err());
    }

    #[test]
    fn test_options_defaults() {
        let config = ControllerConfig::default();
        let payload = PushPayload::parse(br#"{"title":"Hi"}"#).unwrap();
        let options = NotificationOptions::from_payload(&payload, &config);

        assert_eq!(options.body, "");
        assert_eq!(options.icon, "/static/imgs/annamalai.png");
        assert_eq!(options.badge, "/static/imgs/annamalai.png");
        assert_eq!(options.vibrate, vec![100, 50, 100]);
        assert_eq!(options.data.url, "/");
    }

    #[test]
    fn test_null_and_empty_fields_fall_back_to_defaults() {
        let config = ControllerConfig::default();

        let payload = PushPayload::parse(br#"{"title":"Hi","body":null}"#).unwrap();
        let options = NotificationOptions::from_payload(&payload, &config);
        assert_eq!(options.body, "");

        let payload =
            PushPayload::parse(br#"{"title":"Hi","icon":"","badge":"","url":""}"#).unwrap();
        let options = NotificationOptions::from_payload(&payload, &config);
        assert_eq!(options.icon, "/static/imgs/annamalai.png");
        assert_eq!(options.badge, "/static/imgs/annamalai.png");
        assert_eq!(options.data.url, "/");

        let payload = PushPayload::parse(br#"{"title":"Hi","icon":null,"url":null}"#).unwrap();
        let options = NotificationOptions::from_payload(&payload, &config);
        assert_eq!(options.icon, "/static/imgs/annamalai.png");
        assert_eq!(options.data.url, "/");
    }

    #[test]
    fn test_options_keep_payload_values() {
        let config = ControllerConfig::default();
        let payload = PushPayload::parse(
            br#"{"title":"Hi","icon":"/i.png","badge":"/b.png","url":"/student/leave/history/"}"#,
        )
        .unwrap();
        let options = NotificationOptions::from_payload(&payload, &config);

        assert_eq!(options.icon, "/i.png");
        assert_eq!(options.badge, "/b.png");
        assert_eq!(options.data.url, "/student/leave/history/");
    }

    #[test]
    fn test_notifications_show_and_close() {
        let config = ControllerConfig::default();
        let payload = PushPayload::parse(br#"{"title":"Hi"}"#).unwrap();
        let mut notifications = Notifications::new();

        let first = notifications.show("Hi", NotificationOptions::from_payload(&payload, &config));
        let second = notifications.show("Again", NotificationOptions::from_payload(&payload, &config));
        assert_eq!(
            notifications.list().iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![first, second]
        );

        assert_eq!(notifications.close(first).map(|n| n.title), Some("Hi".to_string()));
        assert!(notifications.close(first).is_none());
        assert!(notifications.get(second).is_some());
    }
}
