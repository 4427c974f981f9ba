//! In-memory backend used by the unit tests.
//!
//! Simulates the token, refresh, profile, notification and business
//! endpoints closely enough to exercise expiry, rotation and failure paths.
//! Individual paths can be held open with a gate to make interleavings
//! deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::refresh::REFRESH_PATH;
use crate::auth::session::LOGIN_PATH;
use crate::models::Notification;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
}

struct BackendState {
    username: String,
    password: String,
    access_seq: u32,
    refresh_seq: u32,
    valid_access: String,
    valid_refresh: String,
    rotate_refresh: bool,
    notifications: Vec<Notification>,
    overrides: HashMap<String, (StatusCode, Value)>,
    unreachable: HashSet<String>,
    gates: HashMap<String, watch::Sender<bool>>,
    calls: Vec<RecordedCall>,
}

pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    /// Account `alice` / `correct`; tokens `A1` / `R1` are currently valid.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                username: "alice".into(),
                password: "correct".into(),
                access_seq: 1,
                refresh_seq: 1,
                valid_access: "A1".into(),
                valid_refresh: "R1".into(),
                rotate_refresh: false,
                notifications: Vec::new(),
                overrides: HashMap::new(),
                unreachable: HashSet::new(),
                gates: HashMap::new(),
                calls: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Scenario controls =====

    /// Make `token` the only accepted access token (expires the current one).
    pub fn set_valid_access(&self, token: &str) {
        self.lock().valid_access = token.to_string();
    }

    pub fn set_valid_refresh(&self, token: &str) {
        self.lock().valid_refresh = token.to_string();
    }

    pub fn rotate_refresh_tokens(&self, rotate: bool) {
        self.lock().rotate_refresh = rotate;
    }

    pub fn fail_refresh_transport(&self, fail: bool) {
        self.set_unreachable(REFRESH_PATH, fail);
    }

    /// Calls to `path` fail without a response.
    pub fn set_unreachable(&self, path: &str, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(path.to_string());
        } else {
            state.unreachable.remove(path);
        }
    }

    /// Authenticated calls to `path` answer with a fixed status and body.
    pub fn respond_with(&self, path: &str, status: StatusCode, body: Value) {
        self.lock().overrides.insert(path.to_string(), (status, body));
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        self.lock().notifications = notifications;
    }

    /// Calls to `path` block until `release` is called.
    pub fn hold(&self, path: &str) {
        let (tx, _rx) = watch::channel(false);
        self.lock().gates.insert(path.to_string(), tx);
    }

    pub fn release(&self, path: &str) {
        if let Some(gate) = self.lock().gates.remove(path) {
            let _ = gate.send(true);
        }
    }

    pub fn hold_refresh(&self) {
        self.hold(REFRESH_PATH);
    }

    pub fn release_refresh(&self) {
        self.release(REFRESH_PATH);
    }

    // ===== Inspection =====

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.path == path).count()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls_to(REFRESH_PATH)
    }

    /// Paths called with `bearer`, in dispatch order.
    pub fn calls_with_bearer(&self, bearer: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.bearer.as_deref() == Some(bearer))
            .map(|c| c.path.clone())
            .collect()
    }

    pub fn last_bearer_for(&self, path: &str) -> Option<String> {
        self.lock()
            .calls
            .iter()
            .rev()
            .find(|c| c.path == path)
            .and_then(|c| c.bearer.clone())
    }

    pub fn server_notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    // ===== Endpoint behavior =====

    fn handle(&self, request: &ApiRequest, bearer: Option<&str>) -> ApiResponse {
        let mut state = self.lock();
        let path = request.path();

        if path == LOGIN_PATH {
            let body = request.body().cloned().unwrap_or(Value::Null);
            let matches = body["username"] == state.username.as_str()
                && body["password"] == state.password.as_str();
            if !matches {
                return ApiResponse::json_body(
                    StatusCode::UNAUTHORIZED,
                    &json!({"detail": "No active account found with the given credentials"}),
                );
            }
            return ApiResponse::json_body(
                StatusCode::OK,
                &json!({"access": state.valid_access, "refresh": state.valid_refresh}),
            );
        }

        if path == REFRESH_PATH {
            let presented = request
                .body()
                .and_then(|b| b["refresh"].as_str())
                .unwrap_or_default()
                .to_string();
            if presented != state.valid_refresh {
                return ApiResponse::json_body(
                    StatusCode::UNAUTHORIZED,
                    &json!({"detail": "Token is invalid or expired"}),
                );
            }
            state.access_seq += 1;
            state.valid_access = format!("A{}", state.access_seq);
            if state.rotate_refresh {
                state.refresh_seq += 1;
                state.valid_refresh = format!("R{}", state.refresh_seq);
                return ApiResponse::json_body(
                    StatusCode::OK,
                    &json!({"access": state.valid_access, "refresh": state.valid_refresh}),
                );
            }
            return ApiResponse::json_body(StatusCode::OK, &json!({"access": state.valid_access}));
        }

        if bearer != Some(state.valid_access.as_str()) {
            return ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"detail": "Given token not valid for any token type"}),
            );
        }

        if let Some((status, body)) = state.overrides.get(path) {
            return ApiResponse::json_body(*status, body);
        }

        match path {
            "notifications/unread/" => {
                let unread: Vec<&Notification> =
                    state.notifications.iter().filter(|n| !n.read).collect();
                ApiResponse::json_body(StatusCode::OK, &json!(unread))
            }
            "notifications/mark_all_read/" => {
                for n in &mut state.notifications {
                    n.read = true;
                }
                ApiResponse::json_body(StatusCode::OK, &json!({"status": "ok"}))
            }
            "profiles/my_profile/" => ApiResponse::json_body(
                StatusCode::OK,
                &json!({"id": 1, "username": state.username, "first_name": "Alice",
                        "last_name": "Liddell", "role": "student"}),
            ),
            _ => {
                if let Some(id) = path
                    .strip_prefix("notifications/")
                    .and_then(|rest| rest.strip_suffix("/mark_read/"))
                    .and_then(|id| id.parse::<i64>().ok())
                {
                    return match state.notifications.iter_mut().find(|n| n.id == id) {
                        Some(n) => {
                            n.read = true;
                            ApiResponse::json_body(StatusCode::OK, &json!({"status": "ok"}))
                        }
                        None => ApiResponse::json_body(
                            StatusCode::NOT_FOUND,
                            &json!({"detail": "Not found."}),
                        ),
                    };
                }
                ApiResponse::json_body(
                    StatusCode::OK,
                    &json!({"path": path, "method": request.method().as_str()}),
                )
            }
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                method: request.method().clone(),
                path: request.path().to_string(),
                bearer: bearer.map(String::from),
            });
            state.gates.get(request.path()).map(|g| g.subscribe())
        };

        if let Some(mut gate) = gate {
            // A dropped gate sender counts as released.
            let _ = gate.wait_for(|open| *open).await;
        }

        if self.lock().unreachable.contains(request.path()) {
            return Err(TransportError::Network("connection refused".into()));
        }
        Ok(self.handle(request, bearer))
    }
}

/// Build a notification with sensible defaults.
pub fn notification(id: i64, title: &str) -> Notification {
    Notification {
        id,
        title: title.to_string(),
        message: String::new(),
        kind: Default::default(),
        link: None,
        read: false,
        created_at: None,
    }
}
