//! Metric families and the control plane that routes to them.
//!
//! Every family implements [`Collector`] and is driven synchronously by the
//! scrape handler; long-running work (sampling loops, auto-resume timers)
//! lives in background tasks owned by the family. The [`CollectorSet`]
//! dispatches pause/resume requests by name or the `all` wildcard.

pub mod cluster_processes;
pub mod connections;
pub mod licenses;
pub mod scheduled_jobs;
pub mod sessions;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::rac::cache::QueryCache;
use crate::rac::cluster::ClusterResolver;
use crate::rac::credentials::CredentialStore;
use crate::rac::parser::Record;
use crate::rac::registry::InfobaseRegistry;
use crate::rac::runner::RacError;
use crate::rac::RacClient;

/// Shared cluster access composed into every family.
///
/// One explicitly constructed object instead of per-family copies: the
/// cluster id, the infobase registry, the query cache and the credential
/// store all have a single owner here.
pub struct ClusterContext {
    pub rac: Arc<RacClient>,
    pub resolver: Arc<ClusterResolver>,
    pub registry: Arc<InfobaseRegistry>,
    pub cache: Arc<QueryCache>,
    pub credentials: Arc<CredentialStore>,
}

impl ClusterContext {
    /// Session listing, coalesced through the query cache.
    pub async fn session_records(&self) -> Result<Vec<Record>, RacError> {
        const SIGNATURE: &str = "session list";
        if let Some(hit) = self.cache.get(SIGNATURE) {
            return Ok(hit);
        }
        let cluster_id = self.resolver.cluster_id().await?;
        let records = self.rac.session_list(&cluster_id).await?;
        self.cache.put(SIGNATURE, records.clone());
        Ok(records)
    }

    /// Connection listing, coalesced through the query cache.
    pub async fn connection_records(&self) -> Result<Vec<Record>, RacError> {
        const SIGNATURE: &str = "connection list";
        if let Some(hit) = self.cache.get(SIGNATURE) {
            return Ok(hit);
        }
        let cluster_id = self.resolver.cluster_id().await?;
        let records = self.rac.connection_list(&cluster_id).await?;
        self.cache.put(SIGNATURE, records.clone());
        Ok(records)
    }

    /// Working-process listing, coalesced through the query cache.
    pub async fn process_records(&self) -> Result<Vec<Record>, RacError> {
        const SIGNATURE: &str = "process list";
        if let Some(hit) = self.cache.get(SIGNATURE) {
            return Ok(hit);
        }
        let cluster_id = self.resolver.cluster_id().await?;
        let records = self.rac.process_list(&cluster_id).await?;
        self.cache.put(SIGNATURE, records.clone());
        Ok(records)
    }
}

/// Pause flag and cancellation context shared by all families.
///
/// Pause is checked once at collect entry; Stop cancels the family's
/// background loops. The per-call rac timeout is independent of the
/// cancellation token.
pub struct FamilyState {
    paused: AtomicBool,
    cancel: CancellationToken,
}

impl FamilyState {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Default for FamilyState {
    fn default() -> Self {
        Self::new()
    }
}

/// One named metric family.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable routing key used by the pause/resume endpoints.
    fn name(&self) -> &'static str;

    /// Recomputes and republishes the family's series. Must be a no-op
    /// while paused; resets its metric vecs before repopulating so series
    /// of disappeared entities do not survive.
    async fn collect(&self);

    /// Stops publishing and clears already-published series. Idempotent.
    fn pause(&self);

    /// Resumes publishing. Idempotent.
    fn resume(&self);

    /// Cancels the family's background loops.
    fn stop(&self);
}

/// Flat list of families with pause/resume routing.
pub struct CollectorSet {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorSet {
    pub fn new(collectors: Vec<Arc<dyn Collector>>) -> Self {
        Self { collectors }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Runs every family's collect; paused families no-op internally.
    pub async fn collect_all(&self) {
        for collector in &self.collectors {
            collector.collect().await;
        }
    }

    fn matching(&self, selector: &str) -> Vec<Arc<dyn Collector>> {
        let wanted: Vec<&str> = selector.split(',').map(str::trim).collect();
        let all = wanted.iter().any(|w| *w == "all");
        self.collectors
            .iter()
            .filter(|c| all || wanted.contains(&c.name()))
            .cloned()
            .collect()
    }

    /// Pauses families by comma-separated name list (or `all`), optionally
    /// scheduling an automatic resume.
    pub fn pause(&self, selector: &str, resume_after: Option<Duration>) -> Vec<&'static str> {
        let matched = self.matching(selector);
        let mut names = Vec::with_capacity(matched.len());
        for collector in &matched {
            collector.pause();
            names.push(collector.name());
            info!(collector = collector.name(), "collector paused");
        }

        if let Some(delay) = resume_after {
            for collector in matched {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    debug!(collector = collector.name(), "auto-resume timer fired");
                    collector.resume();
                });
            }
        }

        names
    }

    /// Resumes families by comma-separated name list (or `all`).
    pub fn resume(&self, selector: &str) -> Vec<&'static str> {
        let mut names = Vec::new();
        for collector in self.matching(selector) {
            collector.resume();
            names.push(collector.name());
            info!(collector = collector.name(), "collector resumed");
        }
        names
    }

    /// Cancels every family's background loops on shutdown.
    pub fn stop_all(&self) {
        for collector in &self.collectors {
            collector.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct StubCollector {
        name: &'static str,
        state: FamilyState,
        collected: AtomicUsize,
    }

    impl StubCollector {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                state: FamilyState::new(),
                collected: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Collector for StubCollector {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn collect(&self) {
            if self.state.paused() {
                return;
            }
            self.collected.fetch_add(1, Ordering::SeqCst);
        }

        fn pause(&self) {
            self.state.set_paused(true);
        }

        fn resume(&self) {
            self.state.set_paused(false);
        }

        fn stop(&self) {
            self.state.cancel();
        }
    }

    #[tokio::test]
    async fn pause_routes_by_exact_name() {
        let a = StubCollector::new("sessions");
        let b = StubCollector::new("licenses");
        let set = CollectorSet::new(vec![a.clone(), b.clone()]);

        let paused = set.pause("sessions", None);
        assert_eq!(paused, ["sessions"]);

        set.collect_all().await;
        assert_eq!(a.collected.load(Ordering::SeqCst), 0);
        assert_eq!(b.collected.load(Ordering::SeqCst), 1);

        set.resume("sessions");
        set.collect_all().await;
        assert_eq!(a.collected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_wildcard_matches_everything() {
        let a = StubCollector::new("sessions");
        let b = StubCollector::new("licenses");
        let set = CollectorSet::new(vec![a.clone(), b.clone()]);

        let paused = set.pause("all", None);
        assert_eq!(paused.len(), 2);
        set.collect_all().await;
        assert_eq!(a.collected.load(Ordering::SeqCst), 0);
        assert_eq!(b.collected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auto_resume_fires_after_delay() {
        let a = StubCollector::new("sessions");
        let set = CollectorSet::new(vec![a.clone()]);

        set.pause("sessions", Some(Duration::from_millis(50)));
        assert!(a.state.paused());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!a.state.paused());
    }

    #[tokio::test]
    async fn unknown_names_match_nothing() {
        let a = StubCollector::new("sessions");
        let set = CollectorSet::new(vec![a.clone()]);
        assert!(set.pause("nope", None).is_empty());
        assert!(!a.state.paused());
    }
}
