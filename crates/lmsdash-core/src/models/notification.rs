use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type NotificationId = i64;

/// Severity of a notification; drives the badge color in the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
    /// Also the fallback for types this client does not know.
    #[default]
    #[serde(other)]
    Info,
}

impl NotificationKind {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "notification_type", alias = "kind", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(alias = "is_read", default)]
    pub read: bool,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Navigation target, if the notification points somewhere.
    pub fn target(&self) -> Option<&str> {
        self.link.as_deref().filter(|l| !l.is_empty())
    }
}
