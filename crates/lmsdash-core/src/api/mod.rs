//! REST API client module for the learning-management backend.
//!
//! This module provides:
//! - `Transport`: the raw HTTP call primitive (`ReqwestTransport` in production)
//! - `AuthClient`: bearer-token injection with transparent refresh-and-replay
//! - `resources`: request builders for the dashboard's business endpoints
//!
//! The API uses JWT bearer tokens obtained from `token/` and renewed
//! through `token/refresh/`.

pub mod client;
pub mod error;
pub mod request;
pub mod resources;
pub mod transport;

pub use client::AuthClient;
pub use error::{ApiError, TransportError};
pub use request::{ApiRequest, ApiResponse};
pub use transport::{ReqwestTransport, Transport};
