//! Control HTTP API
//!
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /configs`: running general settings
//! - `PUT /configs?force=true`: reload from a file path or inline payload
//! - `GET /proxies`: every live adapter
//! - `PUT /proxies/:name`: switch a selector group

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::error::Error;

use super::executor::{Executor, ReconfigScope};
use super::metrics::{init_metrics, REGISTRY};

/// Error body returned to API clients
struct ApiError(StatusCode, String);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match e {
            Error::ConfigRead(_) | Error::ConfigParse(_) | Error::Proxy(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "message": self.1 }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct UpdateConfigRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    payload: String,
}

#[derive(Debug, Default, Deserialize)]
struct ForceQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    name: String,
}

async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("[API] can't encode metrics: {}", e);
    }

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn get_configs(State(executor): State<Arc<Executor>>) -> impl IntoResponse {
    Json(executor.general())
}

async fn update_configs(
    State(executor): State<Arc<Executor>>,
    Query(query): Query<ForceQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    // a zero-length body reloads the default path
    let req: UpdateConfigRequest = if body.is_empty() {
        UpdateConfigRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError(StatusCode::BAD_REQUEST, format!("invalid request body: {}", e)))?
    };

    let scope = if query.force {
        ReconfigScope::Full
    } else {
        ReconfigScope::ProxiesAndRulesOnly
    };

    let result = tokio::task::spawn_blocking(move || -> Result<(), Error> {
        let cfg: Config = if !req.payload.is_empty() {
            config::parse_with_bytes(req.payload.as_bytes())?
        } else if !req.path.is_empty() {
            config::parse_with_path(&req.path)?
        } else {
            config::parse()?
        };
        executor.apply_config(cfg, scope);
        Ok(())
    })
    .await
    .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    result?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_proxies(State(executor): State<Arc<Executor>>) -> impl IntoResponse {
    let proxies = executor.state().tunnel().proxies();
    let body: HashMap<&str, serde_json::Value> = proxies
        .iter()
        .map(|(name, proxy)| (name.as_str(), proxy.to_json()))
        .collect();
    Json(json!({ "proxies": body }))
}

async fn select_proxy(
    State(executor): State<Arc<Executor>>,
    Path(group): Path<String>,
    Json(req): Json<SelectRequest>,
) -> Result<StatusCode, ApiError> {
    executor.select_proxy(&group, &req.name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build the API router
pub fn router(executor: Arc<Executor>) -> Router {
    init_metrics();

    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/configs", get(get_configs).put(update_configs))
        .route("/proxies", get(get_proxies))
        .route("/proxies/:name", put(select_proxy))
        .with_state(executor)
}

/// Serve the API until `shutdown_rx` fires
pub async fn serve(
    addr: SocketAddr,
    executor: Arc<Executor>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let app = router(executor);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("[API] failed to bind {}: {}", addr, e);
            return;
        }
    };
    info!("[API] listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("[API] shutting down");
        })
        .await
        .unwrap_or_else(|e| {
            warn!("[API] server error: {}", e);
        });
}
