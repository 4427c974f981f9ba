//! Single-flight access token refresh.
//!
//! The first request that comes back 401 opens a `RefreshOperation` and
//! spawns the refresh call; every later 401 attaches to that operation as a
//! waiter instead of calling the refresh endpoint again. Backends that rotate
//! the refresh token on each use would otherwise reject all but the first of
//! several concurrent refreshes.
//!
//! When the refresh settles, waiters are replayed with the new access token in
//! the order they attached, or all resolved as `SessionExpired` if it failed.
//! The operation runs on its own task, so a caller dropping its future never
//! strands the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::{Credential, CredentialStore};

/// Refresh endpoint, relative to the API base
pub const REFRESH_PATH: &str = "token/refresh/";

type Reply = oneshot::Sender<Result<ApiResponse, ApiError>>;

/// A call that got a 401 and waits to be replayed with a fresh token.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request: ApiRequest,
    sent_with: String,
}

impl PendingRequest {
    /// `sent_with` is the access token the failed attempt carried.
    pub fn new(request: ApiRequest, sent_with: impl Into<String>) -> Self {
        Self {
            request,
            sent_with: sent_with.into(),
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }
}

struct Waiter {
    request: ApiRequest,
    reply: Reply,
}

/// The in-flight refresh. Only its identity matters.
struct RefreshOperation {
    id: u64,
    waiters: Vec<Waiter>,
    cancel: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Error, Debug)]
enum RefreshFailure {
    #[error("refresh rejected with status {0}")]
    Rejected(u16),

    #[error("refresh endpoint unreachable: {0}")]
    Unreachable(#[from] TransportError),

    #[error("refresh response malformed: {0}")]
    Malformed(String),

    #[error("refresh timed out")]
    TimedOut,
}

enum Plan {
    Expired,
    Replay(String),
    Wait(oneshot::Receiver<Result<ApiResponse, ApiError>>),
    Launch {
        id: u64,
        refresh_token: String,
        cancel: CancellationToken,
        outcome: oneshot::Receiver<Result<ApiResponse, ApiError>>,
    },
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
    inflight: Mutex<Option<RefreshOperation>>,
    next_id: AtomicU64,
    on_expired: Box<dyn Fn() + Send + Sync>,
}

impl RefreshCoordinator {
    /// `on_expired` runs once per failed refresh, before waiters are resolved.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
        on_expired: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport,
            store,
            timeout,
            inflight: Mutex::new(None),
            next_id: AtomicU64::new(1),
            on_expired: Box::new(on_expired),
        }
    }

    /// Whether a refresh call is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.lock_inflight().is_some()
    }

    /// Number of requests parked on the in-flight refresh.
    pub fn waiting(&self) -> usize {
        self.lock_inflight()
            .as_ref()
            .map(|op| op.waiters.len())
            .unwrap_or(0)
    }

    /// Queue `pending` for replay after a refresh, starting one if needed.
    pub async fn request_refresh(
        self: &Arc<Self>,
        pending: PendingRequest,
    ) -> Result<ApiResponse, ApiError> {
        let PendingRequest { request, sent_with } = pending;

        let plan = {
            let mut slot = self.lock_inflight();
            match slot.as_mut() {
                Some(op) => {
                    let (reply, outcome) = oneshot::channel();
                    op.waiters.push(Waiter {
                        request: request.clone(),
                        reply,
                    });
                    debug!(
                        operation = op.id,
                        waiters = op.waiters.len(),
                        path = request.path(),
                        "Attached to in-flight refresh"
                    );
                    Plan::Wait(outcome)
                }
                None => match self.store.get() {
                    None => Plan::Expired,
                    // A refresh already replaced the token this call went out with
                    Some(current) if current.access != sent_with => Plan::Replay(current.access),
                    Some(current) => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        let cancel = CancellationToken::new();
                        let (reply, outcome) = oneshot::channel();
                        *slot = Some(RefreshOperation {
                            id,
                            waiters: vec![Waiter {
                                request: request.clone(),
                                reply,
                            }],
                            cancel: cancel.clone(),
                        });
                        Plan::Launch {
                            id,
                            refresh_token: current.refresh,
                            cancel,
                            outcome,
                        }
                    }
                },
            }
        };

        let outcome = match plan {
            Plan::Expired => {
                debug!(path = request.path(), "No refresh token, session already ended");
                return Err(ApiError::SessionExpired);
            }
            Plan::Replay(access) => {
                debug!(path = request.path(), "Token already refreshed, replaying directly");
                return self.transport.send(&request, Some(&access)).await.map_err(ApiError::from);
            }
            Plan::Wait(outcome) => outcome,
            Plan::Launch {
                id,
                refresh_token,
                cancel,
                outcome,
            } => {
                debug!(operation = id, path = request.path(), "Starting token refresh");
                tokio::spawn(Arc::clone(self).run(id, refresh_token, cancel));
                outcome
            }
        };

        // A dropped sender means the operation died without resolving us.
        outcome.await.unwrap_or(Err(ApiError::SessionExpired))
    }

    /// Abandon the in-flight refresh, resolving its waiters as expired.
    ///
    /// Used by logout. Returns how many waiters were resolved.
    pub fn abort(&self) -> usize {
        let Some(op) = self.lock_inflight().take() else {
            return 0;
        };
        op.cancel.cancel();
        let count = op.waiters.len();
        for waiter in op.waiters {
            let _ = waiter.reply.send(Err(ApiError::SessionExpired));
        }
        debug!(operation = op.id, waiters = count, "Aborted in-flight refresh");
        count
    }

    async fn run(self: Arc<Self>, id: u64, refresh_token: String, cancel: CancellationToken) {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(self.timeout, self.call_refresh(&refresh_token)) => {
                result.unwrap_or(Err(RefreshFailure::TimedOut))
            }
        };

        match result {
            Ok(tokens) => {
                let rotated = tokens.refresh.is_some();
                let credential = Credential {
                    access: tokens.access,
                    refresh: tokens.refresh.unwrap_or(refresh_token),
                };
                // Store update and operation teardown happen under one lock so
                // a concurrent logout can never be undone by a late success.
                let waiters = {
                    let mut slot = self.lock_inflight();
                    if slot.as_ref().map(|op| op.id) != Some(id) {
                        return;
                    }
                    self.store.set(&credential);
                    slot.take().map(|op| op.waiters).unwrap_or_default()
                };
                info!(operation = id, waiters = waiters.len(), rotated, "Access token refreshed");
                self.replay(waiters, &credential.access).await;
            }
            Err(failure) => {
                let waiters = {
                    let mut slot = self.lock_inflight();
                    if slot.as_ref().map(|op| op.id) != Some(id) {
                        return;
                    }
                    slot.take().map(|op| op.waiters).unwrap_or_default()
                };
                warn!(operation = id, waiters = waiters.len(), error = %failure, "Token refresh failed, ending session");
                (self.on_expired)();
                for waiter in waiters {
                    let _ = waiter.reply.send(Err(ApiError::SessionExpired));
                }
            }
        }
    }

    async fn call_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshFailure> {
        let request = ApiRequest::post(REFRESH_PATH).json(json!({ "refresh": refresh_token }));
        let response = self.transport.send(&request, None).await?;
        if !response.is_success() {
            return Err(RefreshFailure::Rejected(response.status().as_u16()));
        }
        response
            .json::<RefreshResponse>()
            .map_err(|e| RefreshFailure::Malformed(e.to_string()))
    }

    /// Replay waiters with `access`. `join_all` polls its futures in order on
    /// the first pass, so calls are dispatched FIFO; each waiter is resolved
    /// as soon as its own replay finishes.
    async fn replay(&self, waiters: Vec<Waiter>, access: &str) {
        let transport = &self.transport;
        join_all(waiters.into_iter().map(|waiter| async move {
            let result = transport
                .send(&waiter.request, Some(access))
                .await
                .map_err(ApiError::from);
            let _ = waiter.reply.send(result);
        }))
        .await;
    }

    fn lock_inflight(&self) -> MutexGuard<'_, Option<RefreshOperation>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
