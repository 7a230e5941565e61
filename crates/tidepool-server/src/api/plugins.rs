//! Plugin lifecycle and session endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidepool_plugin::{DiagnosticEntry, SessionSnapshot};
use uuid::Uuid;

use super::error::{fault_response, ApiError, ApiResult};
use super::{cancellable, AppState};

// ─── Request / Response types ───────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub plugins_loaded: usize,
    pub open_pagers: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PluginListResponse {
    pub plugins: Vec<SessionSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsResponse {
    pub plugin_id: Uuid,
    pub entries: Vec<DiagnosticEntry>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub credentials: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CaptchaRequest {
    pub solution: serde_json::Value,
}

// ─── Handlers ───────────────────────────────────────────────────────────

/// GET /api/status: server liveness and counters
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        plugins_loaded: state.host.loaded_count().await,
        open_pagers: state.pagers.open_count(),
        started_at: state.started_at,
    })
}

/// GET /api/plugins: every registered session, faulted ones included
pub async fn list_plugins(State(state): State<Arc<AppState>>) -> Json<PluginListResponse> {
    Json(PluginListResponse {
        plugins: state.host.list_loaded().await,
    })
}

/// GET /api/plugins/{id}: one session's snapshot
pub async fn get_plugin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionSnapshot> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    Ok(Json(session.snapshot()))
}

/// POST /api/plugins/{id}/reload: rebuild the session from its definition
pub async fn reload_plugin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionSnapshot> {
    let dropped = state.pagers.close_plugin(id);
    tracing::debug!(plugin_id = %id, dropped, "closed pagers before reload");

    let session = state.host.reload(id).await.map_err(fault_response)?;
    Ok(Json(session.snapshot()))
}

/// DELETE /api/plugins/{id}: unload a plugin
pub async fn unload_plugin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.host.unload(id).await.map_err(fault_response)?;
    state.pagers.close_plugin(id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/plugins/{id}/diagnostics: recent calls and plugin log lines
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<DiagnosticsResponse> {
    let entries = state.host.diagnostics(id).await.map_err(fault_response)?;
    Ok(Json(DiagnosticsResponse {
        plugin_id: id,
        entries,
    }))
}

/// POST /api/plugins/{id}/login: sign in with plugin-specific credentials
pub async fn login(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<SessionSnapshot> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let snapshot = cancellable(move |cancel| async move {
        session.login(body.credentials, &cancel).await
    })
    .await
    .map_err(fault_response)?;
    Ok(Json(snapshot))
}

/// POST /api/plugins/{id}/logout: drop the plugin's login
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionSnapshot> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let snapshot = cancellable(move |cancel| async move { session.logout(&cancel).await })
        .await
        .map_err(fault_response)?;
    Ok(Json(snapshot))
}

/// POST /api/plugins/{id}/captcha: submit a captcha solution
pub async fn resolve_captcha(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CaptchaRequest>,
) -> ApiResult<SessionSnapshot> {
    let session = state.host.get(id).await.map_err(fault_response)?;
    let snapshot = cancellable(move |cancel| async move {
        session.resolve_captcha(body.solution, &cancel).await
    })
    .await
    .map_err(fault_response)?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::test_support::{json_body, plugin_id, state_with};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use serde_json::{json, Value};
    use tidepool_plugin::{NativeRuntime, ScriptError, ScriptErrorKind};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    // ── Status and listing ───────────────────────────────────────────

    #[tokio::test]
    async fn test_status_reports_loaded_plugins() {
        let state = state_with(NativeRuntime::new).await;
        let resp = router(state).oneshot(get("/api/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["plugins_loaded"], 1);
        assert_eq!(body["open_pagers"], 0);
    }

    #[tokio::test]
    async fn test_list_and_get_plugin() {
        let state = state_with(NativeRuntime::new).await;

        let resp = router(state.clone())
            .oneshot(get("/api/plugins"))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["plugins"][0]["plugin_name"], "api-source");
        assert_eq!(body["plugins"][0]["phase"], "ready");

        let resp = router(state)
            .oneshot(get(&format!("/api/plugins/{}", plugin_id())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["logged_in"], false);
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_404() {
        let state = state_with(NativeRuntime::new).await;
        let resp = router(state)
            .oneshot(get(&format!("/api/plugins/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_reload_and_unload() {
        let state = state_with(NativeRuntime::new).await;

        let req = HttpRequest::builder()
            .method("POST")
            .uri(format!("/api/plugins/{}/reload", plugin_id()))
            .body(Body::empty())
            .unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["phase"], "ready");

        let req = HttpRequest::builder()
            .method("DELETE")
            .uri(format!("/api/plugins/{}", plugin_id()))
            .body(Body::empty())
            .unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.host.loaded_count().await, 0);

        let resp = router(state)
            .oneshot(get(&format!("/api/plugins/{}/diagnostics", plugin_id())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // ── Login ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_login_then_logout() {
        let state = state_with(|| {
            NativeRuntime::new()
                .with_function("login", |input| {
                    assert_eq!(input["credentials"]["token"], "abc");
                    Ok(Value::Null)
                })
                .with_function("logout", |_| Ok(Value::Null))
        })
        .await;

        let resp = router(state.clone())
            .oneshot(post_json(
                &format!("/api/plugins/{}/login", plugin_id()),
                json!({ "credentials": { "token": "abc" } }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["logged_in"], true);

        let req = HttpRequest::builder()
            .method("POST")
            .uri(format!("/api/plugins/{}/logout", plugin_id()))
            .body(Body::empty())
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["logged_in"], false);
    }

    #[tokio::test]
    async fn test_rejected_login_is_plugin_fault() {
        let state = state_with(|| {
            NativeRuntime::new().with_function("login", |_| {
                Err(ScriptError::new(ScriptErrorKind::LoginRequired, "bad password"))
            })
        })
        .await;

        let resp = router(state.clone())
            .oneshot(post_json(
                &format!("/api/plugins/{}/login", plugin_id()),
                json!({ "credentials": {} }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 550);
        let model = json_body(resp).await;
        assert_eq!(model["message"], "bad password");
        assert_eq!(model["plugin_name"], "api-source");

        let session = state.host.get(plugin_id()).await.unwrap();
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn test_captcha_without_capability_is_550() {
        let state = state_with(NativeRuntime::new).await;
        let resp = router(state)
            .oneshot(post_json(
                &format!("/api/plugins/{}/captcha", plugin_id()),
                json!({ "solution": "xyz" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 550);
        assert_eq!(json_body(resp).await["type_name"], "CapabilityException");
    }
}
