//! Push mode: the agent sends its own reports to the kernel, over HTTP
//! (`POST /api/utilization`) or MQTT.

use crate::config::PushConfig;
use crate::server::SharedSampler;
use anyhow::{Context, Result};
use jetson_kernel::models::NodeReport;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const IDLE_PUSH_INTERVAL: Duration = Duration::from_secs(5);

pub enum Pusher {
    Http { client: reqwest::Client, url: String },
    Mqtt { client: AsyncClient, topic: String },
}

pub fn report_url(kernel_url: &str) -> String {
    format!("{}/api/utilization", kernel_url.trim_end_matches('/'))
}

/// Period between two pushes; frequency 0 falls back to a slow heartbeat.
pub fn push_interval(frequency_hz: u32) -> Duration {
    if frequency_hz == 0 {
        IDLE_PUSH_INTERVAL
    } else {
        Duration::from_secs_f64(1.0 / f64::from(frequency_hz))
    }
}

impl Pusher {
    pub fn connect(config: &PushConfig, client_id: &str) -> Result<Self> {
        match config {
            PushConfig::Http { kernel_url } => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                    .context("Failed to build HTTP client")?;
                Ok(Pusher::Http { client, url: report_url(kernel_url) })
            }
            PushConfig::Mqtt { broker_host, broker_port, topic } => {
                let mut opts = MqttOptions::new(client_id, broker_host, *broker_port);
                opts.set_keep_alive(Duration::from_secs(30));
                opts.set_clean_session(true);
                let (client, mut eventloop) = AsyncClient::new(opts, 10);

                // Start MQTT event loop in background
                tokio::spawn(async move {
                    loop {
                        match eventloop.poll().await {
                            Ok(Event::Incoming(Incoming::ConnAck(_))) => info!("Connected to MQTT broker"),
                            Ok(_) => {}
                            Err(e) => {
                                error!("MQTT connection error: {}", e);
                                tokio::time::sleep(Duration::from_secs(5)).await;
                            }
                        }
                    }
                });

                Ok(Pusher::Mqtt { client, topic: topic.clone() })
            }
        }
    }

    pub async fn push(&self, report: &NodeReport) -> Result<()> {
        match self {
            Pusher::Http { client, url } => {
                let resp = client.post(url).json(report).send().await.context("Failed to reach kernel")?;
                let status = resp.status();
                if !status.is_success() {
                    anyhow::bail!("Kernel rejected report: HTTP {}", status);
                }
            }
            Pusher::Mqtt { client, topic } => {
                let payload = serde_json::to_vec(report).context("Failed to serialize report")?;
                client
                    .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
                    .await
                    .context("Failed to publish report")?;
            }
        }
        Ok(())
    }
}

pub fn spawn_push_loop(
    pusher: Pusher,
    sampler: SharedSampler,
    frequency_hz: u32,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = push_interval(frequency_hz);
    info!("Pushing reports every {} ms", period.as_millis());

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let report = sampler.lock().sample();
                    match pusher.push(&report).await {
                        Ok(()) => debug!("Report pushed"),
                        Err(e) => warn!("Push failed: {:#}", e),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_url() {
        assert_eq!(report_url("http://kernel:3000/"), "http://kernel:3000/api/utilization");
        assert_eq!(report_url("http://kernel:3000"), "http://kernel:3000/api/utilization");
    }

    #[test]
    fn test_push_interval() {
        assert_eq!(push_interval(0), Duration::from_secs(5));
        assert_eq!(push_interval(2), Duration::from_millis(500));
    }
}
