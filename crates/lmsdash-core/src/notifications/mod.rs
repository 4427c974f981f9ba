//! Background notification polling.
//!
//! The poller keeps a read-through cache of the user's unread notifications.
//! Every poll replaces the cache wholesale; marking as read only touches the
//! cache after the server acknowledged it.

pub mod poller;

pub use poller::{NotificationPoller, PollerState};

/// Unread notifications for the current user
pub const UNREAD_PATH: &str = "notifications/unread/";

/// Acknowledge every notification at once
pub const MARK_ALL_READ_PATH: &str = "notifications/mark_all_read/";

/// Acknowledge a single notification
pub fn mark_read_path(id: crate::models::NotificationId) -> String {
    format!("notifications/{}/mark_read/", id)
}
