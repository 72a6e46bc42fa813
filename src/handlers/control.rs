//! Pause/resume control endpoints.
//!
//! `GET /pause?collectors=a,b&minutes=5` pauses the listed families (or
//! `all`), optionally scheduling an automatic resume; `GET /resume` is the
//! counterpart. Non-GET methods are rejected by the router.

use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::state::SharedState;

/// Query parameters of the control endpoints.
#[derive(Debug, Deserialize)]
pub struct ControlParams {
    /// Comma-separated family names, or `all`.
    pub collectors: Option<String>,
    /// Auto-resume delay in minutes (pause only).
    pub minutes: Option<u64>,
}

/// Handler for the /pause endpoint.
pub async fn pause_handler(
    State(state): State<SharedState>,
    Query(params): Query<ControlParams>,
) -> (StatusCode, String) {
    let Some(selector) = params.collectors.filter(|s| !s.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "missing 'collectors' parameter\n".to_string(),
        );
    };

    let resume_after = params
        .minutes
        .map(|m| Duration::from_secs(m.saturating_mul(60)));
    let paused = state.collectors.pause(&selector, resume_after);
    info!(?paused, minutes = ?params.minutes, "pause request handled");

    if paused.is_empty() {
        (
            StatusCode::NOT_FOUND,
            format!("no collectors matched '{}'\n", selector),
        )
    } else {
        (StatusCode::OK, format!("paused: {}\n", paused.join(", ")))
    }
}

/// Handler for the /resume endpoint.
pub async fn resume_handler(
    State(state): State<SharedState>,
    Query(params): Query<ControlParams>,
) -> (StatusCode, String) {
    let Some(selector) = params.collectors.filter(|s| !s.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "missing 'collectors' parameter\n".to_string(),
        );
    };

    let resumed = state.collectors.resume(&selector);
    info!(?resumed, "resume request handled");

    if resumed.is_empty() {
        (
            StatusCode::NOT_FOUND,
            format!("no collectors matched '{}'\n", selector),
        )
    } else {
        (StatusCode::OK, format!("resumed: {}\n", resumed.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::CollectorSet;
    use crate::config::Config;
    use crate::state::AppState;
    use prometheus::{Gauge, Registry};
    use std::sync::Arc;

    fn empty_state() -> SharedState {
        Arc::new(AppState {
            registry: Registry::new(),
            collectors: CollectorSet::new(Vec::new()),
            config: Arc::new(Config::default()),
            scrape_duration: Gauge::new("test_scrape_seconds", "test").expect("gauge"),
        })
    }

    #[tokio::test]
    async fn missing_selector_is_a_bad_request() {
        let (status, _) = pause_handler(
            State(empty_state()),
            Query(ControlParams {
                collectors: None,
                minutes: None,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn absurd_resume_delay_does_not_overflow() {
        let (status, _) = pause_handler(
            State(empty_state()),
            Query(ControlParams {
                collectors: Some("all".to_string()),
                minutes: Some(u64::MAX),
            }),
        )
        .await;
        // No families registered, so nothing matches; the point is that the
        // delay arithmetic saturates instead of panicking.
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
