//! Session lifecycle: login, logout and the observable authentication flag.
//!
//! `SessionController` is the only writer of the credential store besides
//! the refresh coordinator. It wires the authenticated client, the refresh
//! coordinator and the notification poller together, and starts or stops
//! the poller on every session transition.

use std::sync::{Arc, Weak};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use super::refresh::RefreshCoordinator;
use super::{Credential, CredentialStore, EntryKey};
use crate::api::{resources, ApiError, ApiRequest, AuthClient, Transport};
use crate::config::ClientSettings;
use crate::models::UserProfile;
use crate::notifications::NotificationPoller;

/// Login endpoint, relative to the API base
pub const LOGIN_PATH: &str = "token/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Anonymous,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Logout,
    Expired,
    StoreFailed,
}

#[derive(Deserialize)]
struct TokenPair {
    access: String,
    refresh: String,
}

pub struct SessionController {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    client: AuthClient,
    poller: Arc<NotificationPoller>,
    state: watch::Sender<SessionState>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        settings: &ClientSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|session: &Weak<Self>| {
            let session = session.clone();
            let coordinator = Arc::new(RefreshCoordinator::new(
                Arc::clone(&transport),
                Arc::clone(&store),
                settings.refresh_timeout,
                move || {
                    if let Some(session) = session.upgrade() {
                        session.end(EndReason::Expired);
                    }
                },
            ));
            let client = AuthClient::new(
                Arc::clone(&transport),
                Arc::clone(&store),
                Arc::clone(&coordinator),
            );
            let poller = NotificationPoller::new(client.clone(), settings.poll_interval);
            let initial = if store.get().is_some() {
                SessionState::Authenticated
            } else {
                SessionState::Anonymous
            };
            let (state, _) = watch::channel(initial);

            Self {
                transport,
                store,
                coordinator,
                client,
                poller,
                state,
            }
        })
    }

    /// Resume whatever session the store holds and start polling if there
    /// is one. Call once at startup.
    pub fn initialize(&self) -> SessionState {
        let state = self.restore();
        if state == SessionState::Authenticated {
            self.poller.start();
        }
        state
    }

    /// Like `initialize`, without starting the poller.
    ///
    /// A half-present credential is purged so the store and the state agree.
    pub fn restore(&self) -> SessionState {
        let restored = if self.store.get().is_some() {
            info!("Restored saved session");
            SessionState::Authenticated
        } else {
            self.store.clear();
            SessionState::Anonymous
        };
        self.state.send_if_modified(|state| std::mem::replace(state, restored) != restored);
        restored
    }

    /// Exchange a username and password for a token pair.
    ///
    /// Uses the raw transport: a 401 here means bad credentials, never an
    /// expired token.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(json!({ "username": username, "password": password }));
        let response = self.transport.send(&request, None).await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                info!(username = username, "Login rejected");
                return Err(ApiError::InvalidCredentials);
            }
            status => return Err(ApiError::from_status(status, &response.text())),
        }

        let tokens: TokenPair = response.json()?;

        // Nothing from a previous session may outlive the new credential: its
        // refresh would overwrite the new tokens or expire the new session.
        let aborted = self.coordinator.abort();
        if self.is_authenticated() {
            self.poller.stop();
            self.store.remove_entry(EntryKey::User);
            info!(aborted_requests = aborted, "Replacing existing session");
        }

        let credential = Credential::new(tokens.access, tokens.refresh);
        self.store.set(&credential);
        if self.store.get().as_ref() != Some(&credential) {
            warn!(username = username, "Credential store did not keep the new tokens");
            self.end(EndReason::StoreFailed);
            return Err(ApiError::CredentialStorage);
        }
        self.state.send_replace(SessionState::Authenticated);
        info!(username = username, "Logged in");
        self.poller.start();
        Ok(())
    }

    /// End the session. Safe to call when already logged out.
    pub fn logout(&self) {
        self.end(EndReason::Logout);
    }

    /// Stop background work without touching the credentials.
    pub fn shutdown(&self) {
        self.poller.stop();
    }

    fn end(&self, reason: EndReason) {
        self.poller.stop();
        let aborted = self.coordinator.abort();
        self.store.clear();

        let changed = self.state.send_if_modified(|state| {
            let was = std::mem::replace(state, SessionState::Anonymous);
            was == SessionState::Authenticated
        });
        if !changed {
            return;
        }
        match reason {
            EndReason::Logout => info!(aborted_requests = aborted, "Logged out"),
            EndReason::Expired => warn!("Session expired, logged out"),
            EndReason::StoreFailed => info!("Previous session ended"),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Observe session transitions, including forced logouts.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    pub fn notifications(&self) -> &Arc<NotificationPoller> {
        &self.poller
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// The cached user, if a profile was loaded during this session.
    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.user()
    }

    /// Fetch the user's profile and cache it alongside the credential.
    pub async fn load_profile(&self) -> Result<UserProfile, ApiError> {
        let profile: UserProfile = self.client.send_json(resources::my_profile()).await?;
        if self.is_authenticated() {
            self.store.set_user(&profile);
        }
        Ok(profile)
    }
}
