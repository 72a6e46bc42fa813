//! Resolution and caching of the administrative cluster id.
//!
//! The exporter manages a single cluster, so the id is resolved at most
//! once per process lifetime and shared by every collector. Resolution
//! failures leave the id empty and are retried on the next demand rather
//! than aborting the process.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::rac::runner::RacError;
use crate::rac::RacClient;

/// Field carrying the cluster id in `rac cluster list` output.
const CLUSTER_ID_FIELD: &str = "cluster";

/// Lazily resolves the cluster id through `rac cluster list`.
///
/// The id is immutable once non-empty. Concurrent first callers serialize
/// on one lock, so only a single rac invocation is ever issued per
/// resolution attempt.
pub struct ClusterResolver {
    rac: Arc<RacClient>,
    cluster_id: Mutex<String>,
}

impl ClusterResolver {
    pub fn new(rac: Arc<RacClient>) -> Self {
        Self {
            rac,
            cluster_id: Mutex::new(String::new()),
        }
    }

    /// Returns the cluster id, resolving it on first use.
    pub async fn cluster_id(&self) -> Result<String, RacError> {
        let mut id = self.cluster_id.lock().await;
        if !id.is_empty() {
            return Ok(id.clone());
        }

        let records = match self.rac.cluster_list().await {
            Ok(records) => records,
            Err(e) => {
                warn!("cluster list failed: {}", e);
                return Err(RacError::Resolution(e.to_string()));
            }
        };

        let resolved = records
            .first()
            .and_then(|r| r.get(CLUSTER_ID_FIELD))
            .cloned()
            .unwrap_or_default();

        if resolved.is_empty() {
            warn!("cluster list returned no cluster id");
            return Err(RacError::Resolution(
                "no cluster field in cluster list output".to_string(),
            ));
        }

        debug!(cluster = %resolved, "resolved cluster id");
        *id = resolved.clone();
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Fake rac that appends one line to a counter file per invocation.
    fn counting_client(dir: &tempfile::TempDir, stdout: &str) -> (Arc<RacClient>, PathBuf) {
        let counter = dir.path().join("calls");
        let path = dir.path().join("fake-rac");
        let mut f = std::fs::File::create(&path).expect("create");
        writeln!(
            f,
            "#!/bin/sh\necho run >> {}\nprintf '{}'",
            counter.display(),
            stdout
        )
        .expect("write");
        let mut perms = f.metadata().expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        drop(f);
        let client = Arc::new(RacClient::new(
            path,
            Duration::from_secs(5),
            None,
            None,
            None,
        ));
        (client, counter)
    }

    fn call_count(counter: &PathBuf) -> usize {
        std::fs::read_to_string(counter)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_invocation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (client, counter) =
            counting_client(&dir, "cluster : 6ba7b810-cafe\\nname : main\\n");
        let resolver = Arc::new(ClusterResolver::new(client));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = resolver.clone();
            handles.push(tokio::spawn(async move { r.cluster_id().await }));
        }
        for handle in handles {
            let id = handle.await.expect("join").expect("resolve");
            assert_eq!(id, "6ba7b810-cafe");
        }

        assert_eq!(call_count(&counter), 1);
    }

    #[tokio::test]
    async fn failure_leaves_id_unresolved_and_retries() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Output without a cluster field.
        let (client, counter) = counting_client(&dir, "name : main\\n");
        let resolver = ClusterResolver::new(client);

        assert!(matches!(
            resolver.cluster_id().await,
            Err(RacError::Resolution(_))
        ));
        // A later call attempts resolution again.
        assert!(resolver.cluster_id().await.is_err());
        assert_eq!(call_count(&counter), 2);
    }
}
