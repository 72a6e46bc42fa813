//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and used by the background collection tasks.

use prometheus::{Gauge, Registry};
use std::sync::Arc;

use crate::collectors::CollectorSet;
use crate::config::Config;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Registry,
    pub collectors: CollectorSet,
    pub config: Arc<Config>,
    /// Time spent serving the last /metrics request.
    pub scrape_duration: Gauge,
}
