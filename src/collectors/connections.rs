//! Connection counts per infobase.

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collectors::{ClusterContext, Collector, FamilyState};

/// Field holding the infobase id in `rac connection list` output.
const INFOBASE_FIELD: &str = "infobase";

/// The connections metric family.
pub struct ConnectionsCollector {
    ctx: Arc<ClusterContext>,
    state: FamilyState,
    connections: GaugeVec,
}

impl ConnectionsCollector {
    pub fn new(
        ctx: Arc<ClusterContext>,
        registry: &Registry,
    ) -> Result<Arc<Self>, prometheus::Error> {
        let connections = GaugeVec::new(
            Opts::new(
                "rac_connections",
                "Current connection count per infobase",
            ),
            &["infobase"],
        )?;
        registry.register(Box::new(connections.clone()))?;

        Ok(Arc::new(Self {
            ctx,
            state: FamilyState::new(),
            connections,
        }))
    }
}

#[async_trait]
impl Collector for ConnectionsCollector {
    fn name(&self) -> &'static str {
        "connections"
    }

    async fn collect(&self) {
        if self.state.paused() {
            return;
        }

        let records = match self.ctx.connection_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!("connection collection failed: {}", e);
                self.connections.reset();
                return;
            }
        };

        self.connections.reset();

        let mut counts: ahash::AHashMap<String, u64> = ahash::AHashMap::new();
        for record in &records {
            let Some(id) = record.get(INFOBASE_FIELD).filter(|v| !v.is_empty()) else {
                continue;
            };
            // Connections of service processes carry no infobase; the
            // registry resolves the rest to display names.
            let name = self.ctx.registry.lookup(id);
            let label = if name.is_empty() { id.clone() } else { name };
            *counts.entry(label).or_insert(0) += 1;
        }

        for (infobase, count) in &counts {
            self.connections
                .with_label_values(&[infobase.as_str()])
                .set(*count as f64);
        }
        debug!(infobases = counts.len(), "connection counts published");
    }

    fn pause(&self) {
        self.state.set_paused(true);
        self.connections.reset();
    }

    fn resume(&self) {
        self.state.set_paused(false);
    }

    fn stop(&self) {
        self.state.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rac::cache::QueryCache;
    use crate::rac::cluster::ClusterResolver;
    use crate::rac::credentials::CredentialStore;
    use crate::rac::parser::parse_text;
    use crate::rac::registry::InfobaseRegistry;
    use crate::rac::RacClient;
    use std::path::PathBuf;
    use std::time::Duration;

    fn context_with_cached_connections(listing: &str) -> Arc<ClusterContext> {
        let rac = Arc::new(RacClient::new(
            PathBuf::from("/nonexistent/rac"),
            Duration::from_secs(1),
            None,
            None,
            None,
        ));
        let resolver = Arc::new(ClusterResolver::new(rac.clone()));
        let registry = Arc::new(InfobaseRegistry::new(rac.clone(), resolver.clone()));
        let (credentials, _rx) = CredentialStore::new(Vec::new(), None);
        let cache = Arc::new(QueryCache::new(Duration::from_secs(60)));
        cache.put("connection list", parse_text(listing));
        Arc::new(ClusterContext {
            rac,
            resolver,
            registry,
            cache,
            credentials,
        })
    }

    #[tokio::test]
    async fn counts_connections_per_infobase() {
        let listing = "connection : c1\ninfobase : ib-1\n\n\
                       connection : c2\ninfobase : ib-1\n\n\
                       connection : c3\ninfobase : ib-2\n\n\
                       connection : c4\n";
        let ctx = context_with_cached_connections(listing);
        let registry = Registry::new();
        let collector = ConnectionsCollector::new(ctx, &registry).expect("collector");

        collector.collect().await;

        let families = registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "rac_connections")
            .expect("family");
        // The record without an infobase field is skipped.
        assert_eq!(family.get_metric().len(), 2);
    }

    #[tokio::test]
    async fn unknown_ids_fall_back_to_the_raw_id_label() {
        let ctx = context_with_cached_connections("connection : c1\ninfobase : ib-9\n");
        let registry = Registry::new();
        let collector = ConnectionsCollector::new(ctx, &registry).expect("collector");

        collector.collect().await;

        let families = registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "rac_connections")
            .expect("family");
        assert_eq!(family.get_metric()[0].get_label()[0].get_value(), "ib-9");
    }
}
