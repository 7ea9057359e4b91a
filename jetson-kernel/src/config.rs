use crate::ingest::{ClusterProfiles, WorkerSettings};
use crate::models::{ClusterDefaults, ClusterKey, ClusterKind};
use crate::retention::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "JETSON_KERNEL_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: String,
    /// Pull-mode targets, `host:port` of each node agent.
    pub nodes: Vec<String>,
    pub polling: PollingConf,
    pub retention: RetentionConf,
    pub storage: StorageConf,
    pub clusters: HashMap<ClusterKey, ClusterConf>,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PollingConf {
    pub interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetentionConf {
    pub window_hours: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConf {
    /// No path: nothing survives a restart.
    pub snapshot_path: Option<String>,
    pub flush_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClusterConf {
    pub name: String,
    #[serde(default)]
    pub kind: ClusterKind,
    #[serde(default = "default_refresh_rate_ms")]
    pub refresh_rate_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_refresh_rate_ms() -> u64 {
    5_000
}

fn default_topic() -> String {
    crate::mqtt::REPORT_TOPIC.to_string()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".into(),
            nodes: Vec::new(),
            polling: PollingConf::default(),
            retention: RetentionConf::default(),
            storage: StorageConf::default(),
            clusters: HashMap::new(),
            mqtt: None,
        }
    }
}

impl Default for PollingConf {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            min_interval_ms: 100,
            max_interval_ms: 60_000,
            timeout_ms: 3_000,
        }
    }
}

impl Default for RetentionConf {
    fn default() -> Self {
        Self {
            window_hours: 7 * 24,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            snapshot_path: Some("data/telemetry.json".into()),
            flush_interval_secs: 30,
        }
    }
}

impl KernelConfig {
    pub fn worker_settings(&self) -> WorkerSettings {
        let p = &self.polling;
        let (lo, hi) = if p.min_interval_ms <= p.max_interval_ms {
            (p.min_interval_ms, p.max_interval_ms)
        } else {
            (p.max_interval_ms, p.min_interval_ms)
        };
        WorkerSettings {
            interval: Duration::from_millis(p.interval_ms.max(1)),
            min_interval: Duration::from_millis(lo.max(1)),
            max_interval: Duration::from_millis(hi.max(1)),
            timeout: Duration::from_millis(p.timeout_ms.max(1)),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            window: Duration::from_secs(self.retention.window_hours.saturating_mul(3600)),
            interval: Duration::from_secs(self.retention.sweep_interval_secs.max(1)),
        }
    }

    pub fn cluster_profiles(&self) -> ClusterProfiles {
        let profiles = self
            .clusters
            .iter()
            .map(|(key, c)| {
                (
                    *key,
                    ClusterDefaults {
                        name: c.name.clone(),
                        kind: c.kind,
                        refresh_rate: Duration::from_millis(c.refresh_rate_ms),
                    },
                )
            })
            .collect();
        ClusterProfiles::new(profiles)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.storage.flush_interval_secs.max(1))
    }

    /// `JETSON_LISTEN` and `JETSON_SNAPSHOT_PATH` take precedence over the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("JETSON_LISTEN") {
            self.listen = listen;
        }
        if let Ok(path) = std::env::var("JETSON_SNAPSHOT_PATH") {
            self.storage.snapshot_path = if path.is_empty() { None } else { Some(path) };
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        match parse_config(&txt) {
            Ok(cfg) => {
                info!("config loaded from {path}");
                cfg
            }
            Err(e) => {
                warn!("invalid config {path}: {e}, using defaults");
                KernelConfig::default()
            }
        }
    } else {
        warn!("no {path}, using default config");
        KernelConfig::default()
    };
    cfg.apply_env_overrides();
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let cfg = parse_config("  \n").unwrap();
        assert_eq!(cfg, KernelConfig::default());
        assert_eq!(cfg.retention_policy(), RetentionPolicy::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let cfg = parse_config(
            r#"
nodes: ["5.4.3.1:8080", "5.4.3.2:8080"]
polling:
  interval_ms: 1000
retention:
  window_hours: 24
clusters:
  2:
    name: "Jetson 2.0"
mqtt:
  host: broker.local
  port: 1883
"#,
        )
        .unwrap();

        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.listen, "0.0.0.0:3000");
        assert_eq!(cfg.worker_settings().interval, Duration::from_secs(1));
        assert_eq!(cfg.worker_settings().timeout, Duration::from_secs(3));
        assert_eq!(cfg.retention_policy().window, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.retention_policy().interval, Duration::from_secs(60));

        let profiles = cfg.cluster_profiles();
        let two = profiles.defaults_for(2);
        assert_eq!(two.name, "Jetson 2.0");
        assert_eq!(two.kind, ClusterKind::Jetson);
        assert_eq!(two.refresh_rate, Duration::from_secs(5));
        assert_eq!(profiles.defaults_for(3).name, "cluster-3");

        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.topic, crate::mqtt::REPORT_TOPIC);
    }

    #[test]
    fn test_inverted_cadence_bounds_are_swapped() {
        let cfg = parse_config("polling: { min_interval_ms: 9000, max_interval_ms: 200 }").unwrap();
        let settings = cfg.worker_settings();
        assert_eq!(settings.min_interval, Duration::from_millis(200));
        assert_eq!(settings.max_interval, Duration::from_millis(9000));
    }

    #[test]
    fn test_zero_min_interval_is_floored() {
        let cfg = parse_config("polling: { min_interval_ms: 0 }").unwrap();
        let settings = cfg.worker_settings();
        assert_eq!(settings.min_interval, Duration::from_millis(1));
        assert_eq!(
            crate::ingest::cadence_for(u32::MAX, &settings),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(parse_config("nodes: [unterminated").is_err());
    }
}
