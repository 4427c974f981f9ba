//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for the access/refresh token pair
//!   (in-memory, encrypted file, or OS keychain)
//! - `RefreshCoordinator`: single-flight token refresh with request replay
//! - `SessionController`: login/logout and the observable session state

pub mod credentials;
pub mod refresh;
pub mod session;

pub use credentials::{
    Credential, CredentialStore, EntryKey, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use refresh::{PendingRequest, RefreshCoordinator};
pub use session::{SessionController, SessionState};
