//! Interaction with the 1C:Enterprise administration utility (rac).
//!
//! This module owns everything between the exporter and the external tool:
//! - `runner`: subprocess execution with an enforced deadline
//! - `parser`: the block-structured text format rac prints
//! - `cluster`: cached resolution of the administrative cluster id
//! - `registry`: the process-wide infobase directory
//! - `cache`: short-TTL coalescing of repeated listings
//! - `credentials`: per-infobase credential lookup and refresh

pub mod cache;
pub mod cluster;
pub mod credentials;
pub mod parser;
pub mod registry;
pub mod runner;

use std::path::PathBuf;
use std::time::Duration;

use crate::rac::parser::Record;
use crate::rac::runner::{CommandRunner, RacError};

/// Typed access to the rac subcommand families the exporter uses.
///
/// All cluster-scoped listings take the resolved cluster id explicitly;
/// only `cluster list` runs without one.
#[derive(Debug, Clone)]
pub struct RacClient {
    runner: CommandRunner,
    /// ras endpoint as `host:port`, appended as the trailing argument.
    address: Option<String>,
    cluster_user: Option<String>,
    cluster_password: Option<String>,
}

impl RacClient {
    pub fn new(
        path: PathBuf,
        timeout: Duration,
        address: Option<String>,
        cluster_user: Option<String>,
        cluster_password: Option<String>,
    ) -> Self {
        Self {
            runner: CommandRunner::new(path, timeout),
            address,
            cluster_user,
            cluster_password,
        }
    }

    fn finish_args(&self, mut args: Vec<String>, with_cluster_auth: bool) -> Vec<String> {
        if with_cluster_auth {
            if let Some(user) = &self.cluster_user {
                args.push(format!("--cluster-user={}", user));
            }
            if let Some(password) = &self.cluster_password {
                args.push(format!("--cluster-pwd={}", password));
            }
        }
        if let Some(address) = &self.address {
            args.push(address.clone());
        }
        args
    }

    /// `rac cluster list` — the only call that does not need a cluster id.
    pub async fn cluster_list(&self) -> Result<Vec<Record>, RacError> {
        let args = self.finish_args(vec!["cluster".into(), "list".into()], false);
        self.runner.run_parsed(&args).await
    }

    /// `rac infobase summary list --cluster=<id>`
    pub async fn infobase_summary_list(&self, cluster_id: &str) -> Result<Vec<Record>, RacError> {
        let args = self.finish_args(
            vec![
                "infobase".into(),
                "summary".into(),
                "list".into(),
                format!("--cluster={}", cluster_id),
            ],
            true,
        );
        self.runner.run_parsed(&args).await
    }

    /// `rac infobase info` with per-infobase credentials.
    pub async fn infobase_info(
        &self,
        cluster_id: &str,
        infobase_id: &str,
        user: &str,
        password: &str,
    ) -> Result<Vec<Record>, RacError> {
        let args = self.finish_args(
            vec![
                "infobase".into(),
                "info".into(),
                format!("--cluster={}", cluster_id),
                format!("--infobase={}", infobase_id),
                format!("--infobase-user={}", user),
                format!("--infobase-pwd={}", password),
            ],
            true,
        );
        self.runner.run_parsed(&args).await
    }

    /// `rac session list --cluster=<id>`
    pub async fn session_list(&self, cluster_id: &str) -> Result<Vec<Record>, RacError> {
        let args = self.finish_args(
            vec![
                "session".into(),
                "list".into(),
                format!("--cluster={}", cluster_id),
            ],
            true,
        );
        self.runner.run_parsed(&args).await
    }

    /// `rac connection list --cluster=<id>`
    pub async fn connection_list(&self, cluster_id: &str) -> Result<Vec<Record>, RacError> {
        let args = self.finish_args(
            vec![
                "connection".into(),
                "list".into(),
                format!("--cluster={}", cluster_id),
            ],
            true,
        );
        self.runner.run_parsed(&args).await
    }

    /// `rac process list --cluster=<id>`
    pub async fn process_list(&self, cluster_id: &str) -> Result<Vec<Record>, RacError> {
        let args = self.finish_args(
            vec![
                "process".into(),
                "list".into(),
                format!("--cluster={}", cluster_id),
            ],
            true,
        );
        self.runner.run_parsed(&args).await
    }
}
