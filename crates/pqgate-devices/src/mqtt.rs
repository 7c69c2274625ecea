//! MQTT south adapter.
//!
//! Connects to the broker, subscribes to the configured topics, and routes
//! every publish whose topic names a known frame kind to the per-asset
//! workers.
//!
//! ## Topic Format
//!
//! Frames arrive on `{station}/{kind}top`, for example `STMS1/ddstop`.
//! Each subscription may name the asset its frames belong to; topics not
//! covered by a named subscription use their first path segment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use pqgate_core::config::{MqttConfig, Subscription};
use pqgate_core::MessageKind;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::{AssetWorkers, ConnectionStatus, FrameHandler, SouthMessage};
use crate::error::{AdapterError, AdapterResult};

/// Consecutive poll errors tolerated before the event loop gives up.
const MAX_POLL_ERRORS: u32 = 5;

/// MQTT south adapter.
pub struct MqttAdapter {
    config: MqttConfig,
    workers: Arc<AssetWorkers>,
    running: Arc<AtomicBool>,
    status: Arc<RwLock<ConnectionStatus>>,
    client: Mutex<Option<rumqttc::AsyncClient>>,
}

impl MqttAdapter {
    pub fn new(config: MqttConfig, handler: Arc<dyn FrameHandler>) -> Self {
        let workers = Arc::new(AssetWorkers::new(handler, config.worker_queue));
        Self {
            config,
            workers,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            client: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn workers(&self) -> &Arc<AssetWorkers> {
        &self.workers
    }

    fn mqtt_options(&self) -> rumqttc::MqttOptions {
        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("pqgate-{}", Uuid::new_v4()));
        let mut options =
            rumqttc::MqttOptions::new(client_id, self.config.broker.clone(), self.config.port);
        options.set_max_packet_size(1024 * 1024, 1024 * 1024);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive.max(5)));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        options
    }

    /// Connect and start the event loop task.
    pub async fn start(&self) -> AdapterResult<()> {
        if self.is_running() {
            return Ok(());
        }
        if self.config.subscriptions.is_empty() {
            return Err(AdapterError::Configuration(
                "no MQTT subscriptions configured".to_string(),
            ));
        }
        let qos = qos_from_level(self.config.qos)?;

        info!(
            broker = %self.config.broker,
            port = self.config.port,
            subscriptions = self.config.subscriptions.len(),
            "Starting MQTT adapter"
        );

        let (client, eventloop) = rumqttc::AsyncClient::new(self.mqtt_options(), 64);
        *self.client.lock() = Some(client.clone());
        *self.status.write() = ConnectionStatus::Connecting;
        self.running.store(true, Ordering::Relaxed);

        let running = self.running.clone();
        let status = self.status.clone();
        let workers = self.workers.clone();
        let subscriptions = self.config.subscriptions.clone();

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            let mut error_count = 0;

            while running.load(Ordering::Relaxed) {
                match eventloop.poll().await {
                    Ok(notification) => {
                        error_count = 0;
                        handle_mqtt_notification(
                            notification,
                            &client,
                            qos,
                            &subscriptions,
                            &workers,
                            &status,
                        );
                    }
                    Err(e) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        error_count += 1;
                        if error_count >= MAX_POLL_ERRORS {
                            error!(
                                error = %e,
                                "MQTT error count reached {}, stopping", MAX_POLL_ERRORS
                            );
                            *status.write() = ConnectionStatus::Error;
                            break;
                        }
                        warn!(
                            "MQTT connection error ({}/{}): {}",
                            error_count, MAX_POLL_ERRORS, e
                        );
                        *status.write() = ConnectionStatus::Reconnecting;
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }

            running.store(false, Ordering::Relaxed);
            if *status.read() != ConnectionStatus::Error {
                *status.write() = ConnectionStatus::Disconnected;
            }
            info!("MQTT event loop closed");
        });

        Ok(())
    }

    /// Stop the event loop and the asset workers.
    pub async fn stop(&self) -> AdapterResult<()> {
        info!("Stopping MQTT adapter");
        self.running.store(false, Ordering::Relaxed);
        let client = self.client.lock().take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!("MQTT disconnect: {}", e);
            }
        }
        self.workers.shutdown();
        *self.status.write() = ConnectionStatus::Disconnected;
        Ok(())
    }
}

fn qos_from_level(level: u8) -> AdapterResult<rumqttc::QoS> {
    match level {
        0 => Ok(rumqttc::QoS::AtMostOnce),
        1 => Ok(rumqttc::QoS::AtLeastOnce),
        2 => Ok(rumqttc::QoS::ExactlyOnce),
        other => Err(AdapterError::Configuration(format!(
            "invalid MQTT QoS level {}",
            other
        ))),
    }
}

/// Handle one event-loop notification.
fn handle_mqtt_notification(
    notification: rumqttc::Event,
    client: &rumqttc::AsyncClient,
    qos: rumqttc::QoS,
    subscriptions: &[Subscription],
    workers: &AssetWorkers,
    status: &RwLock<ConnectionStatus>,
) {
    match notification {
        rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish)) => {
            let topic = publish.topic.to_string();
            let Some(message) = route_publish(&topic, &publish.payload, subscriptions) else {
                debug!(topic = %topic, "Ignoring topic with no frame kind");
                return;
            };
            debug!(
                asset = %message.asset,
                topic = %topic,
                len = message.payload.len(),
                "Frame received"
            );
            workers.dispatch(message);
        }
        rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
            info!("MQTT connection acknowledged");
            *status.write() = ConnectionStatus::Connected;
            // Subscriptions do not survive a clean-session reconnect.
            for sub in subscriptions {
                if let Err(e) = client.try_subscribe(sub.topic.clone(), qos) {
                    warn!(topic = %sub.topic, "Failed to subscribe: {}", e);
                } else {
                    info!(topic = %sub.topic, "Subscribed");
                }
            }
        }
        _ => {}
    }
}

/// Build the south message for a publish, or `None` for topics that carry
/// no known frame kind.
pub fn route_publish(
    topic: &str,
    payload: &[u8],
    subscriptions: &[Subscription],
) -> Option<SouthMessage> {
    MessageKind::from_topic(topic)?;
    let asset = resolve_asset(topic, subscriptions);
    Some(SouthMessage::new(asset, topic, payload.to_vec()))
}

/// Asset for a topic: the first named subscription whose filter matches,
/// else the topic's first path segment.
pub fn resolve_asset(topic: &str, subscriptions: &[Subscription]) -> String {
    subscriptions
        .iter()
        .filter(|s| topic_matches(topic, &s.topic))
        .find_map(|s| s.asset.clone())
        .unwrap_or_else(|| topic.split('/').next().unwrap_or(topic).to_string())
}

/// MQTT topic filter match with `+` and `#` wildcards.
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    let mut topic_parts = topic.split('/');
    let mut filter_parts = filter.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subs() -> Vec<Subscription> {
        vec![
            Subscription {
                topic: "STMS1/+".to_string(),
                asset: Some("Substation-1".to_string()),
            },
            Subscription {
                topic: "plant/#".to_string(),
                asset: None,
            },
        ]
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("STMS1/pdstop", "STMS1/+"));
        assert!(topic_matches("STMS1/pdstop", "#"));
        assert!(topic_matches("a/b/c", "a/#"));
        assert!(topic_matches("STMS1/pdstop", "STMS1/pdstop"));
        assert!(!topic_matches("STMS1/pdstop/x", "STMS1/+"));
        assert!(!topic_matches("STMS2/pdstop", "STMS1/+"));
        assert!(!topic_matches("STMS1", "STMS1/+"));
    }

    #[test]
    fn test_resolve_asset() {
        assert_eq!(resolve_asset("STMS1/ddstop", &subs()), "Substation-1");
        assert_eq!(resolve_asset("plant/adstop", &subs()), "plant");
        assert_eq!(resolve_asset("other/adstop", &subs()), "other");
    }

    #[test]
    fn test_route_publish_requires_kind() {
        let message = route_publish("STMS1/pqstop", &[1, 2], &subs()).unwrap();
        assert_eq!(message.asset, "Substation-1");
        assert_eq!(message.payload, vec![1, 2]);
        assert!(route_publish("STMS1/heartbeat", &[1], &subs()).is_none());
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(1).unwrap(), rumqttc::QoS::AtLeastOnce);
        assert!(qos_from_level(3).is_err());
    }
}
