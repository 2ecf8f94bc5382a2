use crate::config::TestConfig;
use crate::error::HarnessError;
use crate::harness::Harness;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartedBody {
    pub status: String,
    pub num_keys: u64,
}

/// Control and metrics routes over a shared [`Harness`].
pub fn router(harness: Arc<Harness>) -> Router {
    Router::new()
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/status", get(status))
        .route("/api/metrics", get(metrics))
        .with_state(harness)
}

pub async fn serve<F>(harness: Arc<Harness>, bind_addr: &str, shutdown: F) -> Result<(), HarnessError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind_addr).await?;
    serve_listener(harness, listener, shutdown).await
}

pub async fn serve_listener<F>(
    harness: Arc<Harness>,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), HarnessError>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "control API listening");
    axum::serve(listener, router(harness))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn start(State(harness): State<Arc<Harness>>, body: Bytes) -> Response {
    // Parsed by hand so malformed bodies get the same error shape as bad configs.
    let config: TestConfig = match serde_json::from_slice(&body) {
        Ok(config) => config,
        Err(e) => return error_response(e.into()),
    };
    match harness.start(config).await {
        Ok(run) => (
            StatusCode::OK,
            Json(StartedBody { status: "started".to_string(), num_keys: run.num_keys }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn stop(State(harness): State<Arc<Harness>>) -> Response {
    Json(harness.stop().await).into_response()
}

async fn status(State(harness): State<Arc<Harness>>) -> Response {
    Json(harness.status()).into_response()
}

async fn metrics(State(harness): State<Arc<Harness>>) -> Response {
    Json(harness.metrics()).into_response()
}

fn error_response(err: HarnessError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warn!(status = status.as_u16(), error = %err, "request rejected");
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}
