//! Per-infobase credentials and their deferred refresh.
//!
//! `rac infobase info` requires credentials of a user inside the infobase.
//! When a collector meets an infobase with no known credentials it does not
//! fail the cycle; it requests a reload of the credentials section from the
//! configuration file. The request channel holds at most one pending signal,
//! so a burst of misses produces a single reload.

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Credentials of one infobase user, as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfobaseCredential {
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// The `infobases:` section of the configuration file, read in isolation
/// during a credential reload.
#[derive(Debug, Deserialize)]
struct CredentialSection {
    #[serde(default)]
    infobases: Vec<InfobaseCredential>,
}

/// Lookup table from infobase name to credentials, reloadable at runtime.
pub struct CredentialStore {
    source: Option<PathBuf>,
    entries: RwLock<HashMap<String, InfobaseCredential>>,
    refresh_tx: mpsc::Sender<()>,
}

impl CredentialStore {
    /// Builds the store and the receiving end of its refresh channel.
    pub fn new(
        initial: Vec<InfobaseCredential>,
        source: Option<PathBuf>,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let store = Arc::new(Self {
            source,
            entries: RwLock::new(Self::index(initial)),
            refresh_tx,
        });
        (store, refresh_rx)
    }

    fn index(creds: Vec<InfobaseCredential>) -> HashMap<String, InfobaseCredential> {
        creds.into_iter().map(|c| (c.name.clone(), c)).collect()
    }

    /// Returns credentials for an infobase name, if configured.
    pub fn get(&self, name: &str) -> Option<InfobaseCredential> {
        self.entries
            .read()
            .expect("credential store lock poisoned")
            .get(name)
            .cloned()
    }

    /// Requests a credential reload without blocking.
    ///
    /// If a request is already pending the signal is dropped; at most one
    /// reload is in flight per burst of misses.
    pub fn request_refresh(&self) {
        if self.refresh_tx.try_send(()).is_ok() {
            debug!("credential refresh requested");
        }
    }

    /// Re-reads the `infobases:` section from the configuration file.
    pub fn reload(&self) {
        let Some(path) = &self.source else {
            debug!("no configuration file, credential reload skipped");
            return;
        };

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("credential reload failed to read {}: {}", path.display(), e);
                return;
            }
        };

        let section: CredentialSection = match serde_yaml::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                warn!("credential reload failed to parse {}: {}", path.display(), e);
                return;
            }
        };

        let fresh = Self::index(section.infobases);
        let count = fresh.len();
        *self.entries.write().expect("credential store lock poisoned") = fresh;
        info!(infobases = count, "credentials reloaded");
    }

    /// Consumes refresh requests until cancellation.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        mut refresh_rx: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    signal = refresh_rx.recv() => {
                        if signal.is_none() {
                            return;
                        }
                        store.reload();
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }
}
