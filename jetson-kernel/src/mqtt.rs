use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::ingest::Ingestor;
use crate::models::NodeReport;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub const REPORT_TOPIC: &str = "jetson/nodes/report@v1";

/// Decodes one MQTT payload and feeds it to the shared ingestion path.
pub fn handle_payload(ingestor: &Ingestor, payload: &[u8]) {
    let report: NodeReport = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => {
            warn!("invalid report payload: {e}");
            return;
        }
    };
    match ingestor.ingest(&report) {
        Ok(node) => debug!(%node, "mqtt report stored"),
        Err(e) => warn!(cluster = ?report.cluster_id, node = ?report.node_id, "mqtt report dropped: {e}"),
    }
}

pub fn spawn_mqtt_listener(
    conf: MqttConf,
    ingestor: Ingestor,
    health: HealthTracker,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut opts = MqttOptions::new("jetson-kernel", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        if let Err(e) = client.subscribe(&conf.topic, QoS::AtLeastOnce).await {
            error!("MQTT subscribe failed: {e:?}");
            return;
        }
        info!("listening for reports on {}:{} topic {}", conf.host, conf.port, conf.topic);

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => health.mark_mqtt_connected(),
                    Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == conf.topic => {
                        handle_payload(&ingestor, &p.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT error: {e:?}");
                        health.increment_reconnects();
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = client.disconnect().await;
        health.mark_mqtt_disconnected();
        info!("MQTT listener stopped");
    })
}
