//! Configuration handling for rac-cluster-exporter.
//!
//! Configuration comes from a YAML/JSON/TOML file merged with CLI
//! overrides; precedence is CLI > config file > built-in defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::Args;
use crate::rac::credentials::InfobaseCredential;

/// Default configuration constants.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9096;
pub const DEFAULT_RAC_PATH: &str = "/opt/1cv8/x86_64/current/rac";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 15;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 5;
pub const DEFAULT_SAMPLE_INTERVAL_SECONDS: u64 = 10;

/// Output shape of an aggregating collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationMode {
    Summary,
    Histogram,
    Both,
}

impl ObservationMode {
    pub fn summary(self) -> bool {
        matches!(self, Self::Summary | Self::Both)
    }

    pub fn histogram(self) -> bool {
        matches!(self, Self::Histogram | Self::Both)
    }
}

/// Settings of one metric family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub enabled: Option<bool>,
    #[serde(alias = "interval-seconds")]
    pub interval_seconds: Option<u64>,
    pub mode: Option<ObservationMode>,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            enabled: Some(true),
            interval_seconds: Some(DEFAULT_SAMPLE_INTERVAL_SECONDS),
            mode: Some(ObservationMode::Summary),
        }
    }
}

impl FamilyConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.interval_seconds
                .unwrap_or(DEFAULT_SAMPLE_INTERVAL_SECONDS)
                .max(1),
        )
    }

    pub fn mode(&self) -> ObservationMode {
        self.mode.unwrap_or(ObservationMode::Summary)
    }
}

/// Per-family settings block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorsConfig {
    pub sessions: Option<FamilyConfig>,
    pub licenses: Option<FamilyConfig>,
    #[serde(alias = "scheduled-jobs")]
    pub scheduled_jobs: Option<FamilyConfig>,
    pub connections: Option<FamilyConfig>,
    #[serde(alias = "cluster-processes")]
    pub cluster_processes: Option<FamilyConfig>,
}

impl CollectorsConfig {
    pub fn family(&self, name: &str) -> FamilyConfig {
        let block = match name {
            "sessions" => &self.sessions,
            "licenses" => &self.licenses,
            "scheduled_jobs" => &self.scheduled_jobs,
            "connections" => &self.connections,
            "cluster_processes" => &self.cluster_processes,
            _ => &None,
        };
        block.clone().unwrap_or_default()
    }

    fn any_enabled(&self) -> bool {
        [
            "sessions",
            "licenses",
            "scheduled_jobs",
            "connections",
            "cluster_processes",
        ]
        .iter()
        .any(|name| self.family(name).enabled())
    }
}

/// Full exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub bind: Option<String>,
    pub port: Option<u16>,

    // rac invocation
    #[serde(alias = "rac-path")]
    pub rac_path: Option<PathBuf>,
    /// ras endpoint as `host:port`.
    #[serde(alias = "ras-address")]
    pub ras_address: Option<String>,
    #[serde(alias = "cluster-user")]
    pub cluster_user: Option<String>,
    #[serde(alias = "cluster-password")]
    pub cluster_password: Option<String>,
    #[serde(alias = "timeout-seconds")]
    pub timeout_seconds: Option<u64>,

    // Coalescing of repeated listings
    #[serde(alias = "cache-ttl-seconds")]
    pub cache_ttl_seconds: Option<u64>,

    // Logging
    pub log_level: Option<String>,

    // Metric families
    #[serde(default)]
    pub collectors: CollectorsConfig,

    // Per-infobase credentials for detail queries
    #[serde(default)]
    pub infobases: Vec<InfobaseCredential>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            rac_path: Some(PathBuf::from(DEFAULT_RAC_PATH)),
            ras_address: None,
            cluster_user: None,
            cluster_password: None,
            timeout_seconds: Some(DEFAULT_TIMEOUT_SECONDS),
            cache_ttl_seconds: Some(DEFAULT_CACHE_TTL_SECONDS),
            log_level: Some("info".into()),
            collectors: CollectorsConfig::default(),
            infobases: Vec::new(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.cache_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
        )
    }

    pub fn rac_path(&self) -> PathBuf {
        self.rac_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RAC_PATH))
    }
}

/// Validates effective config (used by --check-config and at startup).
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if !cfg.collectors.any_enabled() {
        return Err("at least one collector must be enabled".into());
    }

    if cfg.timeout_seconds == Some(0) {
        return Err("timeout_seconds must be greater than zero".into());
    }

    if let Some(address) = cfg.ras_address.as_deref() {
        if !address.contains(':') {
            return Err(format!("ras_address '{}' is not host:port", address).into());
        }
    }

    for credential in &cfg.infobases {
        if credential.name.is_empty() {
            return Err("infobase credential entry without a name".into());
        }
    }

    Ok(())
}

/// Loads configuration from an explicit path or the default locations.
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        let defaults = [
            "/etc/rac-cluster-exporter/config.yaml",
            "/etc/rac-cluster-exporter/config.yml",
            "/etc/rac-cluster-exporter/config.json",
            "./rac-cluster-exporter.yaml",
            "./rac-cluster-exporter.yml",
            "./rac-cluster-exporter.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(""))
    };

    if !path.exists() || path.to_string_lossy().is_empty() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Resolves configuration from CLI args, config file, and defaults.
///
/// Precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(rac_path) = &args.rac_path {
        config.rac_path = Some(rac_path.clone());
    }
    if let Some(ras) = &args.ras_address {
        config.ras_address = Some(ras.clone());
    }
    if let Some(timeout) = args.timeout_seconds {
        config.timeout_seconds = Some(timeout);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate_effective_config(&config).is_ok());
        assert_eq!(config.timeout(), std::time::Duration::from_secs(15));
    }

    #[test]
    fn yaml_config_round_trips_family_settings() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            "ras_address: srv-1c:1545\ncollectors:\n  sessions:\n    mode: histogram\n    interval_seconds: 3\n  licenses:\n    enabled: false\n"
        )
        .expect("write");

        let config =
            load_config(Some(file.path().to_str().expect("utf8 path"))).expect("load");
        assert_eq!(config.ras_address.as_deref(), Some("srv-1c:1545"));

        let sessions = config.collectors.family("sessions");
        assert!(sessions.mode().histogram());
        assert!(!sessions.mode().summary());
        assert_eq!(sessions.interval(), std::time::Duration::from_secs(3));
        assert!(!config.collectors.family("licenses").enabled());
        // Unconfigured families fall back to defaults.
        assert!(config.collectors.family("connections").enabled());
    }

    #[test]
    fn all_collectors_disabled_is_rejected() {
        let disabled = FamilyConfig {
            enabled: Some(false),
            ..Default::default()
        };
        let config = Config {
            collectors: CollectorsConfig {
                sessions: Some(disabled.clone()),
                licenses: Some(disabled.clone()),
                scheduled_jobs: Some(disabled.clone()),
                connections: Some(disabled.clone()),
                cluster_processes: Some(disabled),
            },
            ..Default::default()
        };
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn bad_ras_address_is_rejected() {
        let config = Config {
            ras_address: Some("no-port".into()),
            ..Default::default()
        };
        assert!(validate_effective_config(&config).is_err());
    }
}
