//! Health check endpoint handler.

use axum::extract::State;
use axum::http::StatusCode;
use tracing::debug;

use crate::state::SharedState;

/// Handler for the /health endpoint.
///
/// The exporter is healthy as long as it can serve requests; degraded rac
/// connectivity shows up as absent series, not as an unhealthy process.
pub async fn health_handler(State(state): State<SharedState>) -> (StatusCode, String) {
    debug!("Processing /health request");
    let names = state.collectors.names();
    let ras = state.config.ras_address.as_deref().unwrap_or("(default)");
    (
        StatusCode::OK,
        format!("OK\nras: {}\ncollectors: {}\n", ras, names.join(", ")),
    )
}
