//! Working-process gauges from `rac process list`.

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collectors::{ClusterContext, Collector, FamilyState};
use crate::rac::parser::{numeric_field, Record};

/// The cluster_processes metric family.
pub struct ClusterProcessesCollector {
    ctx: Arc<ClusterContext>,
    state: FamilyState,
    memory: GaugeVec,
    connections: GaugeVec,
    capacity: GaugeVec,
    available: GaugeVec,
}

fn process_labels(record: &Record) -> [String; 3] {
    [
        record.get("host").cloned().unwrap_or_default(),
        record.get("port").cloned().unwrap_or_default(),
        record.get("pid").cloned().unwrap_or_default(),
    ]
}

impl ClusterProcessesCollector {
    pub fn new(
        ctx: Arc<ClusterContext>,
        registry: &Registry,
    ) -> Result<Arc<Self>, prometheus::Error> {
        let labels = &["host", "port", "pid"];

        let memory = GaugeVec::new(
            Opts::new(
                "rac_process_memory_size_kb",
                "Memory used by a working process",
            ),
            labels,
        )?;
        let connections = GaugeVec::new(
            Opts::new(
                "rac_process_connections",
                "Connections served by a working process",
            ),
            labels,
        )?;
        let capacity = GaugeVec::new(
            Opts::new(
                "rac_process_capacity",
                "Configured capacity of a working process",
            ),
            labels,
        )?;
        let available = GaugeVec::new(
            Opts::new(
                "rac_process_available_performance",
                "Available performance reported by a working process",
            ),
            labels,
        )?;

        registry.register(Box::new(memory.clone()))?;
        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(capacity.clone()))?;
        registry.register(Box::new(available.clone()))?;

        Ok(Arc::new(Self {
            ctx,
            state: FamilyState::new(),
            memory,
            connections,
            capacity,
            available,
        }))
    }

    fn reset(&self) {
        self.memory.reset();
        self.connections.reset();
        self.capacity.reset();
        self.available.reset();
    }
}

#[async_trait]
impl Collector for ClusterProcessesCollector {
    fn name(&self) -> &'static str {
        "cluster_processes"
    }

    async fn collect(&self) {
        if self.state.paused() {
            return;
        }

        let records = match self.ctx.process_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!("process collection failed: {}", e);
                self.reset();
                return;
            }
        };

        self.reset();

        for record in &records {
            let labels = process_labels(record);
            if labels.iter().all(|l| l.is_empty()) {
                continue;
            }
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();

            self.memory
                .with_label_values(&labels)
                .set(numeric_field(record, "memory-size"));
            self.connections
                .with_label_values(&labels)
                .set(numeric_field(record, "connections"));
            self.capacity
                .with_label_values(&labels)
                .set(numeric_field(record, "capacity"));
            self.available
                .with_label_values(&labels)
                .set(numeric_field(record, "available-perfomance"));
        }
        debug!(processes = records.len(), "working processes published");
    }

    fn pause(&self) {
        self.state.set_paused(true);
        self.reset();
    }

    fn resume(&self) {
        self.state.set_paused(false);
    }

    fn stop(&self) {
        self.state.cancel();
    }
}
