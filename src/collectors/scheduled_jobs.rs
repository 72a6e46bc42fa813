//! Scheduled-job lock flags probed per infobase through a bounded worker pool.
//!
//! `rac infobase info` must be called once per infobase and needs that
//! infobase's own credentials, so a large registry means many sequentialized
//! rac invocations. A fixed pool of workers drains a small bounded job queue
//! (the queue bound is the backpressure against bursty registries) and
//! forwards `(name, denied)` results on an output channel that closes once
//! every worker is done.

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use prometheus::{GaugeVec, Opts, Registry};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::collectors::{ClusterContext, Collector, FamilyState};
use crate::rac::registry::InfobaseEntry;
use crate::rac::runner::RacError;

/// Workers issuing rac calls concurrently.
const WORKERS: usize = 10;
/// Job queue bound; feeders block here when the registry is large.
const QUEUE_CAPACITY: usize = 5;
/// Field in `rac infobase info` output carrying the lock flag.
const DENY_FIELD: &str = "scheduled-jobs-deny";

/// The scheduled_jobs metric family.
pub struct ScheduledJobsCollector {
    ctx: Arc<ClusterContext>,
    state: FamilyState,
    denied: GaugeVec,
}

impl ScheduledJobsCollector {
    pub fn new(
        ctx: Arc<ClusterContext>,
        registry: &Registry,
    ) -> Result<Arc<Self>, prometheus::Error> {
        let denied = GaugeVec::new(
            Opts::new(
                "rac_scheduled_jobs_denied",
                "Whether scheduled jobs are locked for the infobase (1 = denied)",
            ),
            &["infobase"],
        )?;
        registry.register(Box::new(denied.clone()))?;

        Ok(Arc::new(Self {
            ctx,
            state: FamilyState::new(),
            denied,
        }))
    }

    /// Queries the lock flag for every registry entry.
    ///
    /// Best effort: infobases without credentials are skipped for this
    /// cycle (after requesting a credential refresh), failed queries are
    /// logged and omitted. No ordering among entries.
    async fn probe(&self, cluster_id: &str) -> HashMap<String, bool> {
        let entries = self.ctx.registry.entries();
        if entries.is_empty() {
            return HashMap::new();
        }

        let (job_tx, job_rx) = mpsc::channel::<InfobaseEntry>(QUEUE_CAPACITY);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(String, bool)>(entries.len());

        for _ in 0..WORKERS {
            let ctx = Arc::clone(&self.ctx);
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let cluster_id = cluster_id.to_string();
            tokio::spawn(async move {
                loop {
                    let entry = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(entry) = entry else {
                        return;
                    };

                    let Some(credential) = ctx.credentials.get(&entry.name) else {
                        let err = RacError::Credentials(entry.name.clone());
                        debug!("{}, skipping this cycle", err);
                        ctx.credentials.request_refresh();
                        continue;
                    };

                    match ctx
                        .rac
                        .infobase_info(
                            &cluster_id,
                            &entry.id,
                            &credential.user,
                            &credential.password,
                        )
                        .await
                    {
                        Ok(records) => {
                            let denied = records
                                .first()
                                .and_then(|r| r.get(DENY_FIELD))
                                .map(|v| v == "on")
                                .unwrap_or(false);
                            // The output channel is sized for the whole
                            // registry; a send can only fail on shutdown.
                            let _ = result_tx.send((entry.name, denied)).await;
                        }
                        Err(e) => {
                            warn!(infobase = %entry.name, "infobase info failed: {}", e);
                        }
                    }
                }
            });
        }
        // Workers hold the remaining senders; the output channel closes
        // when the last worker exits.
        drop(result_tx);

        let feeder = tokio::spawn(async move {
            for entry in entries {
                if job_tx.send(entry).await.is_err() {
                    return;
                }
            }
        });

        let mut flags = HashMap::new();
        while let Some((name, denied)) = result_rx.recv().await {
            flags.insert(name, denied);
        }
        let _ = feeder.await;
        flags
    }
}

#[async_trait]
impl Collector for ScheduledJobsCollector {
    fn name(&self) -> &'static str {
        "scheduled_jobs"
    }

    async fn collect(&self) {
        if self.state.paused() {
            return;
        }

        let cluster_id = match self.ctx.resolver.cluster_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!("scheduled jobs collection failed: {}", e);
                self.denied.reset();
                return;
            }
        };

        let flags = self.probe(&cluster_id).await;

        self.denied.reset();
        for (infobase, denied) in &flags {
            self.denied
                .with_label_values(&[infobase.as_str()])
                .set(if *denied { 1.0 } else { 0.0 });
        }
        debug!(infobases = flags.len(), "scheduled job flags published");
    }

    fn pause(&self) {
        self.state.set_paused(true);
        self.denied.reset();
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
    use crate::rac::credentials::{CredentialStore, InfobaseCredential};
    use crate::rac::registry::InfobaseRegistry;
    use crate::rac::RacClient;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Fake rac serving cluster list, infobase summary list and infobase
    /// info; ib-1 has scheduled jobs locked, everything else unlocked.
    fn fake_rac(dir: &tempfile::TempDir, summary: &str) -> PathBuf {
        let path = dir.path().join("fake-rac");
        let mut f = std::fs::File::create(&path).expect("create");
        write!(
            f,
            "#!/bin/sh\n\
             case \"$1 $2\" in\n\
             \"cluster list\") printf 'cluster : c-1\\n';;\n\
             \"infobase summary\") printf '{}';;\n\
             \"infobase info\")\n\
               case \"$*\" in\n\
               *ib-1*) printf 'scheduled-jobs-deny : on\\n';;\n\
               *) printf 'scheduled-jobs-deny : off\\n';;\n\
               esac;;\n\
             esac\n",
            summary
        )
        .expect("write");
        let mut perms = f.metadata().expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    fn credential(name: &str) -> InfobaseCredential {
        InfobaseCredential {
            name: name.to_string(),
            user: "svc".to_string(),
            password: "pw".to_string(),
        }
    }

    async fn build_collector(
        dir: &tempfile::TempDir,
        summary: &str,
        creds: Vec<InfobaseCredential>,
    ) -> (Arc<ScheduledJobsCollector>, mpsc::Receiver<()>, Registry) {
        let rac = Arc::new(RacClient::new(
            fake_rac(dir, summary),
            Duration::from_secs(5),
            None,
            None,
            None,
        ));
        let resolver = Arc::new(ClusterResolver::new(rac.clone()));
        let registry = Arc::new(InfobaseRegistry::new(rac.clone(), resolver.clone()));
        registry.refresh().await.expect("refresh");
        let (credentials, refresh_rx) = CredentialStore::new(creds, None);
        let ctx = Arc::new(ClusterContext {
            rac,
            resolver,
            registry,
            cache: Arc::new(QueryCache::new(Duration::from_secs(5))),
            credentials,
        });
        let prom = Registry::new();
        let collector = ScheduledJobsCollector::new(ctx, &prom).expect("collector");
        (collector, refresh_rx, prom)
    }

    #[tokio::test]
    async fn probes_lock_flag_for_every_infobase() {
        let dir = tempfile::tempdir().expect("tempdir");
        let summary =
            "infobase : ib-1\\nname : alpha\\n\\ninfobase : ib-2\\nname : beta\\n";
        let (collector, _rx, _prom) = build_collector(
            &dir,
            summary,
            vec![credential("alpha"), credential("beta")],
        )
        .await;

        let flags = collector.probe("c-1").await;
        assert_eq!(flags.len(), 2);
        assert_eq!(flags["alpha"], true);
        assert_eq!(flags["beta"], false);
    }

    #[tokio::test]
    async fn missing_credentials_skip_entity_and_signal_refresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let summary =
            "infobase : ib-1\\nname : alpha\\n\\ninfobase : ib-2\\nname : beta\\n";
        let (collector, mut refresh_rx, _prom) =
            build_collector(&dir, summary, vec![credential("alpha")]).await;

        let flags = collector.probe("c-1").await;
        assert_eq!(flags.len(), 1);
        assert!(flags.contains_key("alpha"));
        assert!(!flags.contains_key("beta"));

        // Exactly one refresh signal is pending.
        assert!(refresh_rx.try_recv().is_ok());
        assert!(refresh_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bursty_registry_drains_through_bounded_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        // More infobases than queue capacity plus workers.
        let mut summary = String::new();
        let mut creds = Vec::new();
        for i in 0..20 {
            summary.push_str(&format!("infobase : base-{i}\\nname : ib{i}\\n\\n"));
            creds.push(credential(&format!("ib{i}")));
        }
        let (collector, _rx, _prom) = build_collector(&dir, &summary, creds).await;

        let flags = collector.probe("c-1").await;
        assert_eq!(flags.len(), 20);
        assert!(flags.values().all(|denied| !denied));
    }

    #[tokio::test]
    async fn collect_publishes_gauge_and_pause_short_circuits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let summary = "infobase : ib-1\\nname : alpha\\n";
        let (collector, _rx, prom) =
            build_collector(&dir, summary, vec![credential("alpha")]).await;

        collector.collect().await;
        assert_eq!(collector.denied.with_label_values(&["alpha"]).get(), 1.0);

        collector.pause();
        collector.collect().await;
        // gather omits families without series once the vec is reset.
        let families = prom.gather();
        assert!(families
            .iter()
            .all(|f| f.get_name() != "rac_scheduled_jobs_denied"));
    }
}
