//! Core library for the lmsdash learning-management dashboard.
//!
//! Owns everything between the presentation layer and the REST backend:
//! credential storage, the authenticated API client with single-flight
//! token refresh, the session state machine, and background notification
//! polling.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod notifications;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, ApiRequest, ApiResponse, AuthClient, ReqwestTransport, Transport};
pub use auth::{Credential, CredentialStore, SessionController, SessionState};
pub use config::{ClientSettings, Config};
pub use models::{Notification, NotificationKind, UserProfile};
pub use notifications::NotificationPoller;
