use serde::Serialize;
use serde_json::{json, Value};

use crate::Error;

/// JSON envelope returned by every API endpoint:
/// `{"status": "...", "response": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub status: &'static str,
    pub response: Value,
}

pub const STATUS_OK: &str = "OK";
pub const STATUS_KO: &str = "KO";
pub const STATUS_INVALID: &str = "INVALID";
pub const STATUS_INVALID_SESSION: &str = "INVALID_SESSION";

impl ApiResponse {
    pub fn ok(response: Value) -> Self {
        Self {
            status: STATUS_OK,
            response,
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(Value::Null)
    }

    /// Render an error as `KO` (or the supplied status override) with the
    /// message wrapped in a one-element array, the shape the web client
    /// expects.
    pub fn error(err: &Error, status: Option<&'static str>) -> Self {
        Self {
            status: status.unwrap_or(STATUS_KO),
            response: json!([err.to_string()]),
        }
    }

    pub fn invalid_session() -> Self {
        Self {
            status: STATUS_INVALID_SESSION,
            response: Value::Null,
        }
    }

    /// Unknown method path.
    pub fn not_found() -> Self {
        Self {
            status: STATUS_INVALID,
            response: json!(["invalid method"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope() {
        let r = ApiResponse::ok(json!({"volume": "storage"}));
        let s = serde_json::to_string(&r).unwrap();
        assert!(s.contains(r#""status":"OK""#));
        assert!(s.contains(r#""volume":"storage""#));
    }

    #[test]
    fn test_error_envelope_wraps_message_in_array() {
        let r = ApiResponse::error(&Error::InvalidPath, None);
        assert_eq!(r.status, "KO");
        assert_eq!(r.response, json!(["path traversal detected"]));
    }

    #[test]
    fn test_error_status_override() {
        let r = ApiResponse::error(&Error::Other("existing session".into()), Some(STATUS_INVALID_SESSION));
        assert_eq!(r.status, "INVALID_SESSION");
    }

    #[test]
    fn test_not_found() {
        let r = ApiResponse::not_found();
        assert_eq!(r.status, "INVALID");
        assert_eq!(r.response, json!(["invalid method"]));
    }
}
