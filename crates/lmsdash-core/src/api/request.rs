//! Request and response descriptors shared by every transport.

use std::fmt;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ApiError;

/// A replayable description of one API call.
///
/// The path is relative to the configured base URL. Descriptors never carry
/// an `Authorization` header: the authenticated client supplies the bearer
/// token separately on every send, so a replay always uses the current one.
#[derive(Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            path: path.trim_start_matches('/').to_string(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Append a query parameter only when a value is present.
    pub fn query_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// Set a request header. `Authorization` is silently dropped.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name != header::AUTHORIZATION {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` and attach it as the JSON payload.
    pub fn with_body<B: Serialize>(self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        Ok(self.json(value))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }
}

// Bodies may hold passwords or refresh tokens, so they are never printed.
impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// A response as received, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Build a response carrying a JSON body.
    pub fn json_body(status: StatusCode, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e))
        })
    }

    /// Turn a non-success status into the matching `ApiError`.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.text()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authorization_header_is_dropped() {
        let req = ApiRequest::get("courses/")
            .header(header::AUTHORIZATION, HeaderValue::from_static("Bearer forged"))
            .header(header::ACCEPT_LANGUAGE, HeaderValue::from_static("ru"));

        assert!(req.headers().get(header::AUTHORIZATION).is_none());
        assert_eq!(req.headers().get(header::ACCEPT_LANGUAGE).unwrap(), "ru");
    }

    #[test]
    fn test_path_is_relative() {
        assert_eq!(ApiRequest::get("/courses/").path(), "courses/");
        assert_eq!(ApiRequest::get("courses/").path(), "courses/");
    }

    #[test]
    fn test_debug_hides_body() {
        let req = ApiRequest::post("token/").json(json!({"password": "hunter2"}));
        let printed = format!("{:?}", req);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("token/"));
    }

    #[test]
    fn test_query_opt() {
        let req = ApiRequest::get("lessons/")
            .query_opt("course_id", Some(4))
            .query_opt::<i64>("lesson_id", None);
        assert_eq!(req.query_params(), &[("course_id".to_string(), "4".to_string())]);
    }

    #[test]
    fn test_error_for_status() {
        let ok = ApiResponse::json_body(StatusCode::OK, &json!({"id": 1}));
        assert!(ok.error_for_status().is_ok());

        let missing = ApiResponse::new(StatusCode::NOT_FOUND, "gone");
        assert_eq!(
            missing.error_for_status().unwrap_err(),
            ApiError::NotFound("gone".into())
        );
    }
}
