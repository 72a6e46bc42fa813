//! Session metrics with high-frequency sampling and scrape-time flushing.
//!
//! Scrape intervals are controlled by the monitoring system and are often
//! longer than the phenomena worth measuring: a session's current memory or
//! call duration can spike and vanish between two scrapes. This family runs
//! its own sampling loop at a short fixed interval and folds every sample
//! into a per-session accumulator; the scrape drains the accumulators into
//! quantile and/or histogram observations.
//!
//! Merge policy per field:
//! - instantaneous fields (`*-current`) keep the maximum seen since the
//!   last flush, so short-lived peaks survive until the next scrape;
//! - cumulative fields (`*-total`, `duration-all*`) keep the most recent
//!   sample, since rac already reports a running total.

use ahash::{AHashMap as HashMap, AHashSet};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::collectors::{ClusterContext, Collector, FamilyState};
use crate::config::ObservationMode;
use crate::rac::parser::Record;

/// Field naming the session in `rac session list` output.
const SESSION_ID_FIELD: &str = "session-id";
/// Field naming the client application of a session.
const APP_ID_FIELD: &str = "app-id";

/// Instantaneous fields, merged by maximum.
pub const CURRENT_FIELDS: &[&str] = &[
    "memory-current",
    "duration-current",
    "duration-current-dbms",
    "cpu-time-current",
    "read-current",
    "write-current",
];

/// Running-total fields, merged by last sample.
pub const TOTAL_FIELDS: &[&str] = &[
    "memory-total",
    "duration-all",
    "duration-all-dbms",
    "cpu-time-total",
    "read-total",
    "write-total",
];

/// Quantiles published in summary mode; "max" rides along as its own label.
const QUANTILES: &[f64] = &[0.5, 0.9, 0.99];

static CURRENT_SET: Lazy<AHashSet<&'static str>> =
    Lazy::new(|| CURRENT_FIELDS.iter().copied().collect());

fn metric_name(field: &str) -> String {
    format!("rac_session_{}", field.replace('-', "_"))
}

/// Prometheus objects of the sessions family.
struct SessionMetrics {
    /// Per-field quantile gauges, labels: quantile.
    summaries: HashMap<&'static str, GaugeVec>,
    /// Per-field histograms over flushed accumulator values. Kept as
    /// zero-label vecs so pause can drop the published series.
    histograms: HashMap<&'static str, HistogramVec>,
    /// Live session count per client application, maintained by the
    /// sampling loop and unaffected by the flush drain.
    sessions_by_app: GaugeVec,
}

impl SessionMetrics {
    fn new(registry: &Registry, mode: ObservationMode) -> Result<Self, prometheus::Error> {
        let mut summaries = HashMap::new();
        let mut histograms = HashMap::new();

        for field in CURRENT_FIELDS.iter().chain(TOTAL_FIELDS) {
            if mode.summary() {
                let gauge = GaugeVec::new(
                    Opts::new(
                        metric_name(field),
                        format!("Session {} aggregated since the last scrape", field),
                    ),
                    &["quantile"],
                )?;
                registry.register(Box::new(gauge.clone()))?;
                summaries.insert(*field, gauge);
            }
            if mode.histogram() {
                let histogram = HistogramVec::new(
                    HistogramOpts::new(
                        format!("{}_histogram", metric_name(field)),
                        format!("Session {} distribution per flushed accumulator", field),
                    )
                    .buckets(prometheus::exponential_buckets(1.0, 4.0, 12)?),
                    &[],
                )?;
                registry.register(Box::new(histogram.clone()))?;
                histograms.insert(*field, histogram);
            }
        }

        let sessions_by_app = GaugeVec::new(
            Opts::new(
                "rac_sessions_by_application",
                "Live session count per client application id",
            ),
            &["app_id"],
        )?;
        registry.register(Box::new(sessions_by_app.clone()))?;

        Ok(Self {
            summaries,
            histograms,
            sessions_by_app,
        })
    }

    fn reset_summaries(&self) {
        for gauge in self.summaries.values() {
            gauge.reset();
        }
    }

    fn reset_all(&self) {
        self.reset_summaries();
        for histogram in self.histograms.values() {
            histogram.reset();
        }
        self.sessions_by_app.reset();
    }
}

/// Merges one sample into a per-session accumulator.
fn merge_sample(accumulator: &mut Record, sample: &Record) {
    for (key, value) in sample.iter() {
        if CURRENT_SET.contains(key.as_str()) {
            let old = accumulator
                .get(key)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(f64::MIN);
            let new = value.parse::<f64>().unwrap_or(f64::MIN);
            if new >= old {
                accumulator.insert(key.clone(), value.clone());
            }
        } else {
            accumulator.insert(key.clone(), value.clone());
        }
    }
}

/// Nearest-rank quantile over a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[index]
}

/// The sessions metric family.
pub struct SessionsCollector {
    ctx: Arc<ClusterContext>,
    state: FamilyState,
    mode: ObservationMode,
    buffer: Mutex<HashMap<String, Record>>,
    metrics: SessionMetrics,
}

impl SessionsCollector {
    pub fn new(
        ctx: Arc<ClusterContext>,
        mode: ObservationMode,
        registry: &Registry,
    ) -> Result<Arc<Self>, prometheus::Error> {
        Ok(Arc::new(Self {
            ctx,
            state: FamilyState::new(),
            mode,
            buffer: Mutex::new(HashMap::new()),
            metrics: SessionMetrics::new(registry, mode)?,
        }))
    }

    /// Starts the internal sampling loop, independent of scrape timing.
    pub fn spawn_sampling_loop(self: &Arc<Self>, interval: Duration) {
        let collector = Arc::clone(self);
        let cancel = collector.state.cancel_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !collector.state.paused() {
                            collector.sample().await;
                        }
                    }
                    _ = cancel.cancelled() => {
                        debug!("session sampling loop stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Takes one sample of the session listing and merges it in.
    async fn sample(&self) {
        let records = match self.ctx.session_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!("session sampling failed: {}", e);
                // A degraded family publishes nothing, not stale counts.
                self.metrics.sessions_by_app.reset();
                return;
            }
        };

        let mut app_counts: HashMap<String, u64> = HashMap::new();
        {
            let mut buffer = self.buffer.lock().expect("session buffer lock poisoned");
            for record in &records {
                let Some(session_id) = record.get(SESSION_ID_FIELD).filter(|s| !s.is_empty())
                else {
                    continue;
                };
                let accumulator = buffer.entry(session_id.clone()).or_default();
                merge_sample(accumulator, record);

                let app = record.get(APP_ID_FIELD).cloned().unwrap_or_default();
                *app_counts.entry(app).or_insert(0) += 1;
            }
        }

        self.metrics.sessions_by_app.reset();
        for (app, count) in app_counts {
            self.metrics
                .sessions_by_app
                .with_label_values(&[app.as_str()])
                .set(count as f64);
        }
    }

    /// Drains every accumulator into observations and empties the buffer.
    ///
    /// Sessions with no samples since the last flush are simply absent
    /// from this scrape's output.
    fn flush(&self) {
        let drained: HashMap<String, Record> = {
            let mut buffer = self.buffer.lock().expect("session buffer lock poisoned");
            std::mem::take(&mut *buffer)
        };

        self.metrics.reset_summaries();

        for field in CURRENT_FIELDS.iter().chain(TOTAL_FIELDS) {
            let mut values: Vec<f64> = drained
                .values()
                .filter_map(|record| record.get(*field))
                .filter_map(|v| v.parse::<f64>().ok())
                .collect();
            if values.is_empty() {
                continue;
            }
            values.sort_by(|a, b| a.total_cmp(b));

            if self.mode.summary() {
                if let Some(gauge) = self.metrics.summaries.get(field) {
                    for q in QUANTILES {
                        let label = q.to_string();
                        gauge
                            .with_label_values(&[label.as_str()])
                            .set(quantile(&values, *q));
                    }
                    gauge
                        .with_label_values(&["max"])
                        .set(*values.last().unwrap_or(&0.0));
                }
            }
            if self.mode.histogram() {
                if let Some(histogram) = self.metrics.histograms.get(field) {
                    for value in &values {
                        histogram.with_label_values::<&str>(&[]).observe(*value);
                    }
                }
            }
        }

        debug!(sessions = drained.len(), "session buffer flushed");
    }
}

#[async_trait]
impl Collector for SessionsCollector {
    fn name(&self) -> &'static str {
        "sessions"
    }

    async fn collect(&self) {
        if self.state.paused() {
            return;
        }
        // Catch up immediately when the sampler has not run yet in this
        // scrape window; the cache coalesces the extra listing away.
        self.sample().await;
        self.flush();
    }

    fn pause(&self) {
        self.state.set_paused(true);
        self.buffer
            .lock()
            .expect("session buffer lock poisoned")
            .clear();
        self.metrics.reset_all();
    }

    fn resume(&self) {
        self.state.set_paused(false);
    }

    fn stop(&self) {
        self.state.cancel();
    }
}
