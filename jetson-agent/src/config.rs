//! Agent configuration
//!
//! Handles:
//! - Node identity (cluster id, node id)
//! - Pull endpoint address and report frequency
//! - Optional push to the kernel (HTTP or MQTT)
//! - Power rail location on Jetson boards

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub cluster_id: u32,
    pub node_id: u32,
    /// Address served for pull mode (`GET /api/sample`).
    pub listen: String,
    /// Reports per second; 0 lets the kernel poll at its own cadence and
    /// pushes every 5 s.
    pub frequency_hz: u32,
    pub push: Option<PushConfig>,
    pub power: PowerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PushConfig {
    /// Base URL of the kernel, e.g. `http://kernel:3000`.
    Http { kernel_url: String },
    Mqtt {
        broker_host: String,
        broker_port: u16,
        #[serde(default = "default_topic")]
        topic: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// INA3221 iio directory. Missing directory: power is reported as zero.
    pub rail_dir: PathBuf,
    pub channel: u8,
}

fn default_topic() -> String {
    "jetson/nodes/report@v1".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            node_id: 0,
            listen: "0.0.0.0:8080".to_string(),
            frequency_hz: 1,
            push: None,
            power: PowerConfig::default(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            rail_dir: PathBuf::from("/sys/bus/i2c/drivers/ina3221x/6-0040/iio:device0"),
            channel: 0,
        }
    }
}

impl AgentConfig {
    /// Loads the config file if present, then applies `JETSON_*` overrides.
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content).with_context(|| format!("Invalid config {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|k| std::env::var(k).ok());
        Ok(config)
    }

    /// OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("jetson-agent");
        path.push("config.toml");
        Ok(path)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("JETSON_CLUSTER_ID").and_then(|v| v.parse().ok()) {
            self.cluster_id = v;
        }
        if let Some(v) = var("JETSON_NODE_ID").and_then(|v| v.parse().ok()) {
            self.node_id = v;
        }
        if let Some(v) = var("JETSON_AGENT_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = var("JETSON_FREQUENCY_HZ").and_then(|v| v.parse().ok()) {
            self.frequency_hz = v;
        }
        if let Some(url) = var("JETSON_KERNEL_URL") {
            self.push = Some(PushConfig::Http { kernel_url: url });
        }
    }
}
