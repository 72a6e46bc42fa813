//! License session counts grouped by the issuing license server.

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collectors::{ClusterContext, Collector, FamilyState};
use crate::rac::parser::Record;

/// Field describing the license granted to a session; the first token is
/// the address of the server that issued it.
const LICENSE_FIELD: &str = "license";

/// Extracts the issuing server address from a session's license field.
fn license_server(record: &Record) -> Option<String> {
    record
        .get(LICENSE_FIELD)
        .and_then(|v| v.split_whitespace().next())
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_matches('"').to_string())
}

/// The licenses metric family.
pub struct LicensesCollector {
    ctx: Arc<ClusterContext>,
    state: FamilyState,
    sessions_by_server: GaugeVec,
}

impl LicensesCollector {
    pub fn new(
        ctx: Arc<ClusterContext>,
        registry: &Registry,
    ) -> Result<Arc<Self>, prometheus::Error> {
        let sessions_by_server = GaugeVec::new(
            Opts::new(
                "rac_license_sessions",
                "Sessions holding a license, per issuing license server",
            ),
            &["server"],
        )?;
        registry.register(Box::new(sessions_by_server.clone()))?;

        Ok(Arc::new(Self {
            ctx,
            state: FamilyState::new(),
            sessions_by_server,
        }))
    }
}

#[async_trait]
impl Collector for LicensesCollector {
    fn name(&self) -> &'static str {
        "licenses"
    }

    async fn collect(&self) {
        if self.state.paused() {
            return;
        }

        let records = match self.ctx.session_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!("license collection failed: {}", e);
                self.sessions_by_server.reset();
                return;
            }
        };

        self.sessions_by_server.reset();

        let mut counts: ahash::AHashMap<String, u64> = ahash::AHashMap::new();
        for record in &records {
            if let Some(server) = license_server(record) {
                *counts.entry(server).or_insert(0) += 1;
            }
        }

        for (server, count) in &counts {
            self.sessions_by_server
                .with_label_values(&[server.as_str()])
                .set(*count as f64);
        }
        debug!(servers = counts.len(), "license sessions published");
    }

    fn pause(&self) {
        self.state.set_paused(true);
        self.sessions_by_server.reset();
    }

    fn resume(&self) {
        self.state.set_paused(false);
    }

    fn stop(&self) {
        self.state.cancel();
    }
}
