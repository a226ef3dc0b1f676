use std::any::Any;
use std::net::{IpAddr, SocketAddr};

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::errors::NormalizedError;
use crate::BoxError;

use super::config::ServiceConfig;
use super::rpc::rpc_handler;
use super::state::AppState;
use super::webhook::line_webhook;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.inbound_body_max_bytes;
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/webhook", post(line_webhook))
        .route("/rpc/:procedure", post(rpc_handler))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let state = AppState::new(config)?;
    if let Err(err) = state.config.require_webhook() {
        error!("webhook requests will be rejected until configured: {}", err);
    }
    info!(
        "calendar gateway listening on {} (env={:?}, timezone={})",
        addr,
        state.config.app_env,
        state.config.default_timezone.name()
    );

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    state.tracker.close();
    info!(
        "waiting for {} webhook dispatch task(s) to settle",
        state.tracker.len()
    );
    state.tracker.wait().await;
    serve_result?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("request handler panicked: {}", detail);
    NormalizedError::internal("PANIC", detail).into_response()
}
