//! Data models for the types the core exchanges with the backend.
//!
//! Business entities (courses, lessons, assignments, ...) stay opaque JSON;
//! only the shapes the session and notification machinery depend on are
//! modeled here.

pub mod notification;
pub mod profile;

pub use notification::{Notification, NotificationId, NotificationKind};
pub use profile::UserProfile;
