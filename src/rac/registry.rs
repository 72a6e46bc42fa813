//! Process-wide directory of infobases registered in the cluster.
//!
//! One registry instance is shared by every collector; nobody keeps a
//! private copy. A single background loop refreshes it hourly, dropping to
//! a one-minute cadence while refreshes fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rac::cluster::ClusterResolver;
use crate::rac::runner::RacError;
use crate::rac::RacClient;

/// Refresh cadence while the last refresh succeeded.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
/// Shortened cadence after a failed refresh.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// One infobase known to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfobaseEntry {
    pub id: String,
    pub name: String,
}

/// Shared infobase directory, replaced wholesale on each refresh.
pub struct InfobaseRegistry {
    rac: Arc<RacClient>,
    resolver: Arc<ClusterResolver>,
    entries: RwLock<Vec<InfobaseEntry>>,
    refresh_started: AtomicBool,
}

impl InfobaseRegistry {
    pub fn new(rac: Arc<RacClient>, resolver: Arc<ClusterResolver>) -> Self {
        Self {
            rac,
            resolver,
            entries: RwLock::new(Vec::new()),
            refresh_started: AtomicBool::new(false),
        }
    }

    /// Lists infobases and atomically replaces the entry set.
    pub async fn refresh(&self) -> Result<usize, RacError> {
        let cluster_id = self.resolver.cluster_id().await?;
        let records = self.rac.infobase_summary_list(&cluster_id).await?;

        let mut fresh: Vec<InfobaseEntry> = Vec::with_capacity(records.len());
        for record in &records {
            let id = record.get("infobase").cloned().unwrap_or_default();
            let name = record.get("name").cloned().unwrap_or_default();
            if id.is_empty() {
                continue;
            }
            // Entries are unique by id; rac should not repeat them, but a
            // duplicated block must not produce two entries.
            if fresh.iter().any(|e| e.id == id) {
                continue;
            }
            fresh.push(InfobaseEntry { id, name });
        }

        let count = fresh.len();
        *self.entries.write().expect("registry lock poisoned") = fresh;
        debug!(infobases = count, "infobase registry refreshed");
        Ok(count)
    }

    /// Resolves an infobase id to its name; unknown ids yield an empty string.
    pub fn lookup(&self, id: &str) -> String {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all current entries.
    pub fn entries(&self) -> Vec<InfobaseEntry> {
        self.entries.read().expect("registry lock poisoned").clone()
    }

    /// Starts the background refresh loop.
    ///
    /// Only the first call per process starts a loop; collectors may all
    /// request it without spawning duplicate rac invocation storms. The
    /// loop refreshes immediately, then on the hourly cadence, shortening
    /// to one-minute retries while refreshes fail.
    pub fn spawn_refresh_loop(self: &Arc<Self>, cancel: CancellationToken) {
        if self.refresh_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            info!("infobase registry refresh loop started");
            loop {
                let interval = match registry.refresh().await {
                    Ok(count) => {
                        debug!(infobases = count, "scheduled registry refresh done");
                        REFRESH_INTERVAL
                    }
                    Err(e) => {
                        warn!("registry refresh failed, retrying sooner: {}", e);
                        RETRY_INTERVAL
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => {
                        info!("infobase registry refresh loop stopped");
                        return;
                    }
                }
            }
        });
    }
}
