//! HTTP endpoint handlers for the exporter.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/metrics`: Prometheus metrics endpoint
//! - `/pause`, `/resume`: collector control endpoints
//! - `/health`: Health check endpoint

pub mod control;
pub mod health;
pub mod metrics;

// Re-export handlers
pub use control::{pause_handler, resume_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
