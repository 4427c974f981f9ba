//! Authenticated API client.
//!
//! `AuthClient` attaches the current access token to every call and turns
//! a 401 into a refresh-and-replay through the `RefreshCoordinator`, so
//! callers only ever see the final outcome.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::auth::refresh::{PendingRequest, RefreshCoordinator, REFRESH_PATH};
use crate::auth::CredentialStore;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clone is cheap - every field is shared.
#[derive(Clone)]
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
        }
    }

    /// Send `request` with the current access token, if any.
    ///
    /// Every status other than 401 comes back verbatim. A 401 on a call that
    /// carried a token is handed to the refresh coordinator and the replay's
    /// outcome is returned instead.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let credential = self.store.get();
        let access = credential.as_ref().map(|c| c.access.as_str());

        let response = self.transport.send(&request, access).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // The refresh endpoint must never trigger another refresh.
        if request.path() == REFRESH_PATH {
            return Ok(response);
        }

        let Some(credential) = credential else {
            debug!(path = request.path(), "401 without credential");
            return Err(ApiError::Unauthenticated);
        };

        debug!(method = %request.method(), path = request.path(), "Access token rejected, refreshing");
        self.coordinator
            .request_refresh(PendingRequest::new(request, credential.access))
            .await
    }

    /// Send and decode a JSON success body.
    ///
    /// Non-success statuses become `ApiError`s; 429 is retried with
    /// exponential backoff before giving up.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send_with_backoff(request).await?;
        response.json()
    }

    /// Send, discarding any success body.
    pub async fn send_ack(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.send_with_backoff(request).await.map(|_| ())
    }

    async fn send_with_backoff(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.send(request.clone()).await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return response.error_for_status();
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(path = request.path(), retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(ApiRequest::post(path).with_body(body)?).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(ApiRequest::put(path).with_body(body)?).await
    }

    pub async fn patch_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(ApiRequest::patch(path).with_body(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send_ack(ApiRequest::delete(path)).await
    }
}
