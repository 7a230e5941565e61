pub mod content;
pub mod error;
pub mod pagers;
pub mod plugins;

use axum::{
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tidepool_plugin::{DialogFault, Fault, PluginHost};
use tokio_util::sync::CancellationToken;

use self::pagers::PagerStore;

/// Shared state handed to every handler.
pub struct AppState {
    pub host: Arc<PluginHost>,
    pub pagers: PagerStore,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(host: Arc<PluginHost>) -> Self {
        Self {
            host,
            pagers: PagerStore::default(),
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/status", get(plugins::status))
        .route("/plugins", get(plugins::list_plugins))
        .route(
            "/plugins/{id}",
            get(plugins::get_plugin).delete(plugins::unload_plugin),
        )
        .route("/plugins/{id}/reload", post(plugins::reload_plugin))
        .route("/plugins/{id}/diagnostics", get(plugins::diagnostics))
        .route("/plugins/{id}/login", post(plugins::login))
        .route("/plugins/{id}/logout", post(plugins::logout))
        .route("/plugins/{id}/captcha", post(plugins::resolve_captcha))
        .route("/plugins/{id}/home", get(content::home))
        .route("/plugins/{id}/search", post(content::search))
        .route("/plugins/{id}/channel", post(content::channel))
        .route("/plugins/{id}/details", get(content::details))
        .route("/plugins/{id}/comments", get(content::comments))
        .route(
            "/plugins/{id}/replies/{reference_id}",
            get(content::replies),
        )
        .route("/plugins/{id}/playlist", get(content::playlist))
        .route("/plugins/{id}/rating", get(content::rating))
        .route("/pagers/{pager_id}/next", post(pagers::next_page))
        .route("/pagers/{pager_id}", delete(pagers::close_pager));

    Router::new().nest("/api", api).with_state(state)
}

/// Run a plugin call on its own task, cancelled if the request goes away.
///
/// Axum drops the handler future when the client disconnects; the drop guard
/// then cancels the token so the session abandons the call and frees its slot.
pub async fn cancellable<F, Fut, T>(op: F) -> Result<T, Fault>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, Fault>> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let joined = tokio::spawn(op(cancel)).await;
    guard.disarm();
    joined.map_err(|e| Fault::Dialog(DialogFault::from_error(e)))?
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::Response;
    use tidepool_plugin::{
        HostConfig, MemoryStateStore, NativeRuntime, NativeRuntimeFactory, PluginDefinition,
    };
    use uuid::Uuid;

    pub const PLUGIN_ID: &str = "3c9e1f7a-5b2d-4e8f-a1c6-0d7b9e2f4a13";

    pub const CONFIG: &str = r#"
[plugin]
id = "3c9e1f7a-5b2d-4e8f-a1c6-0d7b9e2f4a13"
name = "api-source"
version = "1.0.0"
description = "Source used by the API tests"

[script]
entry = "api-source"
runtime = "native"

[capabilities.home]
[capabilities.details]
[capabilities.comments]
[capabilities.channel]

[authentication]
login_url = "https://tube.example/login"
"#;

    pub fn plugin_id() -> Uuid {
        Uuid::parse_str(PLUGIN_ID).unwrap()
    }

    pub fn video(id: &str) -> serde_json::Value {
        serde_json::json!({
            "content_type": "video",
            "id": { "platform": "tube", "value": id },
            "name": format!("Video {id}"),
            "url": format!("https://tube.example/watch/{id}"),
        })
    }

    /// State with one loaded native plugin built by `build`.
    pub async fn state_with<F>(build: F) -> Arc<AppState>
    where
        F: Fn() -> NativeRuntime + Send + Sync + 'static,
    {
        let factory = NativeRuntimeFactory::new().register("api-source", build);
        let host = Arc::new(PluginHost::new(
            Arc::new(factory),
            Arc::new(MemoryStateStore::new()),
            HostConfig::default(),
        ));
        host.load(PluginDefinition::new(CONFIG, Vec::new()))
            .await
            .unwrap();
        Arc::new(AppState::new(host))
    }

    pub async fn json_body(resp: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
