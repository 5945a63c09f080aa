//! HTTP health and metrics endpoints.
//!
//! `/healthz` reports every instance's aggregate health, `/livez` every
//! instance's instantaneous liveness. Both answer `200 OK` or `500` with the
//! first failure's text.

use crate::error::ProviderError;
use crate::health::ClassifiedError;
use crate::metrics;
use crate::plugin::Plugin;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
struct ProbeState {
    plugins: Arc<[Arc<Plugin>]>,
}

/// Build the probe router over the given instances.
pub fn router(plugins: Vec<Arc<Plugin>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
        .route("/metrics", get(metrics_text))
        .with_state(ProbeState {
            plugins: plugins.into(),
        })
}

/// Serve `router` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<(), ProviderError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Probe server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz(State(state): State<ProbeState>) -> (StatusCode, String) {
    respond("health", state.plugins.iter().map(|p| p.health()))
}

async fn livez(State(state): State<ProbeState>) -> (StatusCode, String) {
    respond("liveness", state.plugins.iter().map(|p| p.live()))
}

async fn metrics_text() -> Response {
    match metrics::gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn respond(
    probe: &'static str,
    results: impl Iterator<Item = Result<(), ClassifiedError>>,
) -> (StatusCode, String) {
    for result in results {
        if let Err(err) = result {
            warn!(probe, category = %err.category, error = %err, "Probe failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    }
    (StatusCode::OK, "OK".to_string())
}
