//! Fault to HTTP response mapping.
//!
//! Plugin faults travel as `550` with the flattened exception model as body,
//! so clients can tell them apart from transport-level failures.

use axum::{http::StatusCode, Json};
use serde_json::json;
use tidepool_plugin::{Fault, PLUGIN_FAULT_STATUS};
use uuid::Uuid;

pub type ApiError = (StatusCode, Json<serde_json::Value>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// nginx's "client closed request"; nobody reads it, but it shows in traces.
const CLIENT_CLOSED_REQUEST: u16 = 499;

pub fn plugin_fault_status() -> StatusCode {
    StatusCode::from_u16(PLUGIN_FAULT_STATUS).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn fault_response(fault: Fault) -> ApiError {
    match fault {
        Fault::NotFound(id) => not_found("plugin", id),
        Fault::Cancelled => (
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
            Json(json!({ "error": "request cancelled" })),
        ),
        fault => {
            let model = fault.flatten();
            let body = serde_json::to_value(&model)
                .unwrap_or_else(|_| json!({ "error": model.message }));
            (plugin_fault_status(), Json(body))
        }
    }
}

pub fn not_found(what: &str, id: Uuid) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} {id} not found") })),
    )
}

pub fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("failed to build response: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_plugin::PluginRef;

    fn plugin() -> PluginRef {
        PluginRef::new(Uuid::nil(), "tube")
    }

    #[test]
    fn test_plugin_fault_is_550_with_model() {
        let (status, Json(body)) = fault_response(Fault::Timeout {
            plugin: plugin(),
            operation: "search".into(),
            after: std::time::Duration::from_secs(30),
        });
        assert_eq!(status.as_u16(), 550);
        assert_eq!(body["plugin_name"], "tube");
        assert!(!body["code"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_plugin_is_404() {
        let (status, _) = fault_response(Fault::NotFound(Uuid::nil()));
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_cancelled_is_not_a_plugin_fault() {
        let (status, _) = fault_response(Fault::Cancelled);
        assert_eq!(status.as_u16(), 499);
    }
}
