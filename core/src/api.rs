//! Remote API request and response envelope.
//!
//! Requests are `{method, path, query, body}`. Every response body follows the
//! same envelope: `{success, data, message?, pagination?}` on success and
//! `{success: false, error | message, details?}` on failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Reads are the only requests eligible for the offline cache.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get)
    }

    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the API base, e.g. `/tickets/TK-1/messages`
    pub path: String,
    /// Query parameters; ordered so equal reads produce equal cache keys
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// JSON body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Build a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
        }
    }

    /// Build a request carrying a JSON body.
    #[must_use]
    pub fn with_body(method: Method, path: impl Into<String>, body: Value) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: Some(body),
        }
    }

    /// Add a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Key of the circuit breaker guarding this request.
    #[must_use]
    pub fn endpoint_key(&self) -> &str {
        &self.path
    }
}

/// Pagination block attached to list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page (1-based)
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Total number of items
    pub total: u64,
    /// Total number of pages
    #[serde(default)]
    pub total_pages: u32,
}

/// Response body envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseBody {
    /// Whether the server considers the call successful
    #[serde(default)]
    pub success: bool,
    /// Payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Pagination for list endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    /// Error description on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured error details on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ResponseBody {
    /// Successful envelope around `data`.
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            pagination: None,
            error: None,
            details: None,
        }
    }

    /// Failed envelope with an error description.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Best available error text (`error`, then `message`).
    #[must_use]
    pub fn error_text(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_default()
    }
}

/// A raw HTTP response as returned by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded envelope
    pub body: ResponseBody,
}

impl ApiResponse {
    /// `200 OK` with `{success: true, data}`.
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self {
            status: 200,
            body: ResponseBody::ok(data),
        }
    }

    /// An error status with `{success: false, error}`.
    #[must_use]
    pub fn error(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody::failure(error),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success_status(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_parameters_are_ordered() {
        let a = ApiRequest::get("/tickets").query("status", "open").query("page", "2");
        let b = ApiRequest::get("/tickets").query("page", "2").query("status", "open");
        assert_eq!(a, b);
        assert_eq!(a.endpoint_key(), "/tickets");
    }

    #[test]
    fn error_envelope_decodes() {
        let body: ResponseBody =
            serde_json::from_value(json!({"success": false, "message": "nope", "details": {"field": "text"}}))
                .unwrap();
        assert!(!body.success);
        assert_eq!(body.error_text(), "nope");
        assert!(body.details.is_some());
    }

    #[test]
    fn list_envelope_decodes_pagination() {
        let body: ResponseBody = serde_json::from_value(json!({
            "success": true,
            "data": [],
            "pagination": {"page": 1, "limit": 20, "total": 0, "totalPages": 0}
        }))
        .unwrap();
        assert_eq!(body.pagination.unwrap().limit, 20);
    }
}
