use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tidepool_plugin::{HostConfig, JsonFileStateStore, PluginHost, WasmRuntimeFactory};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod api;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let plugin_dir =
        PathBuf::from(std::env::var("PLUGIN_DIR").unwrap_or_else(|_| "./data/plugins".to_string()));
    let state_file = std::env::var("TIDEPOOL_STATE_FILE")
        .unwrap_or_else(|_| "./data/session-state.json".to_string());
    let listen = std::env::var("TIDEPOOL_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let host = Arc::new(PluginHost::new(
        Arc::new(WasmRuntimeFactory::from_env()),
        Arc::new(JsonFileStateStore::new(state_file)),
        HostConfig::from_env(),
    ));

    match host.load_dir(&plugin_dir).await {
        Ok(count) => tracing::info!(dir = %plugin_dir.display(), count, "plugins loaded"),
        Err(e) => tracing::error!(dir = %plugin_dir.display(), "failed to scan plugin directory: {e}"),
    }

    let state = Arc::new(api::AppState::new(Arc::clone(&host)));

    // CORS: explicit origins from TIDEPOOL_CORS_ORIGINS, local UI otherwise
    let cors = {
        let origins: Vec<HeaderValue> = std::env::var("TIDEPOOL_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| HeaderValue::from_str(s.trim()).ok())
            .filter(|v| !v.is_empty())
            .collect();
        let origins = if origins.is_empty() {
            tracing::warn!("TIDEPOOL_CORS_ORIGINS not set, allowing http://localhost:3000 only");
            vec![HeaderValue::from_static("http://localhost:3000")]
        } else {
            tracing::info!("CORS allowed origins: {:?}", origins);
            origins
        };
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(tower_http::cors::Any)
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = listen
        .parse()
        .expect("TIDEPOOL_LISTEN must be a socket address");
    tracing::info!(%addr, "server started");

    axum::serve(tokio::net::TcpListener::bind(addr).await.unwrap(), app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    host.unload_all().await;
    tracing::info!("all plugins unloaded");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
