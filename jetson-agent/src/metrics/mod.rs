//! Local sampling: per-core CPU usage, memory, uptime and power rail,
//! packaged as the report the kernel ingests.

use crate::config::AgentConfig;
use crate::discovery::SystemInfo;
use crate::power;
use jetson_kernel::models::NodeReport;
use sysinfo::System;
use tracing::debug;

const MB: u64 = 1024 * 1024;

pub struct Sampler {
    sys: System,
    config: AgentConfig,
    info: SystemInfo,
}

impl Sampler {
    pub fn new(config: AgentConfig, info: SystemInfo) -> Self {
        // First CPU reading is a baseline; usage is computed on the next refresh.
        let sys = System::new_all();
        Self { sys, config, info }
    }

    pub fn sample(&mut self) -> NodeReport {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let cores: Vec<f32> = self
            .sys
            .cpus()
            .iter()
            .map(|cpu| clamp_percent(cpu.cpu_usage()))
            .collect();
        let available = self.sys.available_memory();
        let used = self.sys.total_memory().saturating_sub(available);

        let report = NodeReport {
            cluster_id: Some(self.config.cluster_id),
            node_id: Some(self.config.node_id),
            memory_free: available / MB,
            memory_used: used / MB,
            node_ip: self.info.ip.clone(),
            cores,
            os: self.info.os.clone(),
            uptime: System::uptime(),
            frequency: self.config.frequency_hz,
            power: power::read_rail(&self.config.power.rail_dir, self.config.power.channel),
        };
        debug!(cores = report.cores.len(), used_mb = report.memory_used, "sampled");
        report
    }
}

/// sysinfo may briefly report slightly above 100 % on some kernels.
fn clamp_percent(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jetson_kernel::ingest::validate;

    fn info() -> SystemInfo {
        SystemInfo {
            hostname: "nano-01".into(),
            os: "L4T R32.4.3".into(),
            ip: "5.4.3.1".into(),
        }
    }

    #[test]
    fn test_sample_is_a_valid_report() {
        let config = AgentConfig {
            cluster_id: 2,
            node_id: 1,
            ..Default::default()
        };
        let mut sampler = Sampler::new(config, info());
        let report = sampler.sample();

        assert_eq!(report.cluster_id, Some(2));
        assert_eq!(report.node_id, Some(1));
        assert_eq!(report.node_ip, "5.4.3.1");
        assert!(!report.cores.is_empty());
        validate(&report).unwrap();
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(101.5), 100.0);
        assert_eq!(clamp_percent(-0.1), 0.0);
        assert_eq!(clamp_percent(f32::NAN), 0.0);
        assert_eq!(clamp_percent(42.0), 42.0);
    }
}
