//! Topic-keyed fan-out of readings to WebSocket subscribers.
//!
//! Subscribers register under `(asset, topic_category)`. A published
//! reading goes to every subscriber under the key derived from its asset
//! and the second segment of its topic, serialized in canonical order.
//! A subscriber whose send fails or times out is removed; the others
//! still receive the message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use pqgate_core::config::BroadcastConfig;
use pqgate_core::{Fields, Reading, ReadingPublisher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BroadcastError;
use crate::handlers::ws::connection_state::ConnectionMetadata;

/// Registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberKey {
    pub asset: String,
    pub category: String,
}

impl SubscriberKey {
    pub fn new(asset: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            category: category.into(),
        }
    }

    /// Key a reading is delivered under, if its topic has a category.
    pub fn for_reading(reading: &Reading) -> Option<Self> {
        reading
            .topic_category()
            .map(|category| Self::new(reading.asset.as_str(), category))
    }
}

#[derive(Clone)]
struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<String>,
    connection: Arc<ConnectionMetadata>,
}

/// Receiving end handed to a connection.
pub struct Subscription {
    pub id: Uuid,
    pub key: SubscriberKey,
    pub receiver: mpsc::Receiver<String>,
    pub connection: Arc<ConnectionMetadata>,
}

/// One entry of a publish payload, in either the south shape
/// `{asset_code, reading}` or the north shape `{asset, readings}`.
#[derive(Debug, Deserialize)]
struct PublishedEntry {
    #[serde(alias = "asset_code")]
    asset: Option<String>,
    #[serde(alias = "reading", default)]
    readings: Fields,
}

impl PublishedEntry {
    fn into_reading(self) -> Option<Reading> {
        let asset = self.asset.filter(|a| !a.is_empty())?;
        Reading::from_flat(asset, self.readings)
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub keys: usize,
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

pub struct Broadcaster {
    registry: DashMap<SubscriberKey, Vec<Subscriber>>,
    send_timeout: Duration,
    queue_capacity: usize,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(&BroadcastConfig::default())
    }
}

impl Broadcaster {
    pub fn new(config: &BroadcastConfig) -> Self {
        Self {
            registry: DashMap::new(),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            queue_capacity: config.queue_capacity.max(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Register a new subscriber under `key`.
    pub async fn subscribe(&self, key: SubscriberKey) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        let connection = Arc::new(ConnectionMetadata::new());

        self.registry.entry(key.clone()).or_default().push(Subscriber {
            id,
            tx,
            connection: connection.clone(),
        });
        connection.open().await;
        info!(asset = %key.asset, category = %key.category, subscriber = %id, "Subscriber registered");

        Subscription {
            id,
            key,
            receiver,
            connection,
        }
    }

    /// Remove one subscriber. The key is deleted with its last subscriber.
    pub fn unsubscribe(&self, key: &SubscriberKey, id: Uuid) -> bool {
        let removed = match self.registry.get_mut(key) {
            Some(mut subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|s| s.id != id);
                subscribers.len() != before
            }
            None => false,
        };
        self.registry.remove_if(key, |_, subscribers| subscribers.is_empty());
        if removed {
            debug!(asset = %key.asset, category = %key.category, subscriber = %id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self, key: &SubscriberKey) -> usize {
        self.registry.get(key).map_or(0, |s| s.len())
    }

    pub fn contains_key(&self, key: &SubscriberKey) -> bool {
        self.registry.contains_key(key)
    }

    /// Deliver a reading to its key's subscribers. Returns how many
    /// received it.
    pub async fn publish(&self, reading: &Reading) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let Some(key) = SubscriberKey::for_reading(reading) else {
            debug!(topic = %reading.topic, "Topic has no category, not broadcasting");
            return 0;
        };

        // Snapshot so no registry lock is held across sends.
        let targets: Vec<Subscriber> = match self.registry.get(&key) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };

        let payload = match reading.to_canonical_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(asset = %reading.asset, error = %e, "Failed to serialize reading for broadcast");
                return 0;
            }
        };

        let sends = targets
            .iter()
            .map(|s| s.tx.send_timeout(payload.clone(), self.send_timeout));
        let results = futures::future::join_all(sends).await;

        let mut delivered = 0;
        for (subscriber, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        asset = %key.asset,
                        category = %key.category,
                        subscriber = %subscriber.id,
                        error = %e,
                        "Dropping subscriber after failed send"
                    );
                    subscriber.connection.mark_closed().await;
                    self.unsubscribe(&key, subscriber.id);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Route a JSON publish payload: an object carries one reading, an
    /// array a batch. Entries without an asset, timestamp or topic are
    /// skipped.
    pub async fn publish_payload(&self, text: &str) -> Result<usize, BroadcastError> {
        let entries = match serde_json::from_str::<Value>(text)? {
            value @ Value::Object(_) => vec![value],
            Value::Array(items) => items,
            Value::Null => return Err(BroadcastError::UnsupportedPayload("null")),
            Value::Bool(_) => return Err(BroadcastError::UnsupportedPayload("a boolean")),
            Value::Number(_) => return Err(BroadcastError::UnsupportedPayload("a number")),
            Value::String(_) => return Err(BroadcastError::UnsupportedPayload("a string")),
        };

        let mut delivered = 0;
        for entry in entries {
            let reading = serde_json::from_value::<PublishedEntry>(entry)
                .ok()
                .and_then(PublishedEntry::into_reading);
            match reading {
                Some(reading) => delivered += self.publish(&reading).await,
                None => warn!("Payload missing asset or topic, skipping entry"),
            }
        }
        Ok(delivered)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            keys: self.registry.len(),
            subscribers: self.registry.iter().map(|e| e.value().len()).sum(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ReadingPublisher for Broadcaster {
    async fn publish(&self, reading: &Reading) -> usize {
        Broadcaster::publish(self, reading).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ws::connection_state::ConnectionState;

    fn reading(asset: &str, topic: &str) -> Reading {
        let mut r = Reading::new(asset, "2024-06-15 09:15:30", topic);
        r.add("Current1", 150i64);
        r.add("IsNlf", true);
        r
    }

    fn broadcaster(send_timeout_ms: u64, queue_capacity: usize) -> Broadcaster {
        Broadcaster::new(&BroadcastConfig {
            send_timeout_ms,
            queue_capacity,
        })
    }

    #[tokio::test]
    async fn test_delivers_only_to_matching_key() {
        let b = Broadcaster::default();
        let mut pq = b.subscribe(SubscriberKey::new("STMS1", "pqstop")).await;
        let mut pd = b.subscribe(SubscriberKey::new("STMS1", "pdstop")).await;
        let mut other = b.subscribe(SubscriberKey::new("STMS2", "pqstop")).await;

        assert_eq!(b.publish(&reading("STMS1", "STMS1/pqstop")).await, 1);
        assert_eq!(
            pq.receiver.recv().await.unwrap(),
            r#"{"timestamp":"2024-06-15 09:15:30","topic":"STMS1/pqstop","Current1":150,"IsNlf":true}"#
        );
        assert!(pd.receiver.try_recv().is_err());
        assert!(other.receiver.try_recv().is_err());
        assert_eq!(pq.connection.state().await, ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_failed_send_drops_only_that_subscriber() {
        let b = Broadcaster::default();
        let key = SubscriberKey::new("STMS1", "adstop");
        let mut alive = b.subscribe(key.clone()).await;
        let gone = b.subscribe(key.clone()).await;
        let gone_connection = gone.connection.clone();
        drop(gone);

        assert_eq!(b.publish(&reading("STMS1", "STMS1/adstop")).await, 1);
        assert!(alive.receiver.recv().await.is_some());
        assert_eq!(b.subscriber_count(&key), 1);
        assert_eq!(gone_connection.state().await, ConnectionState::Closed);
        assert_eq!(b.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_times_out() {
        let b = broadcaster(20, 1);
        let key = SubscriberKey::new("STMS1", "adstop");
        let _stalled = b.subscribe(key.clone()).await;

        assert_eq!(b.publish(&reading("STMS1", "STMS1/adstop")).await, 1);
        // Queue is full and never drained.
        assert_eq!(b.publish(&reading("STMS1", "STMS1/adstop")).await, 0);
        assert!(!b.contains_key(&key));
    }

    #[tokio::test]
    async fn test_last_unsubscribe_deletes_key() {
        let b = Broadcaster::default();
        let key = SubscriberKey::new("STMS1", "ddstop");
        let first = b.subscribe(key.clone()).await;
        let second = b.subscribe(key.clone()).await;

        assert!(b.unsubscribe(&key, first.id));
        assert!(b.contains_key(&key));
        assert!(b.unsubscribe(&key, second.id));
        assert!(!b.contains_key(&key));
        assert!(!b.unsubscribe(&key, second.id));
        assert_eq!(b.stats().keys, 0);
    }

    #[tokio::test]
    async fn test_publish_south_and_north_payloads() {
        let b = Broadcaster::default();
        let mut sub = b.subscribe(SubscriberKey::new("STMS1", "pqstop")).await;

        let south = r#"{"asset_code": "STMS1", "reading": {"Current1": 1, "topic": "STMS1/pqstop", "timestamp": "2024-06-15 09:15:30"}}"#;
        assert_eq!(b.publish_payload(south).await.unwrap(), 1);
        assert_eq!(
            sub.receiver.recv().await.unwrap(),
            r#"{"timestamp":"2024-06-15 09:15:30","topic":"STMS1/pqstop","Current1":1}"#
        );

        let north = r#"[
            {"asset": "STMS1", "readings": {"timestamp": "t1", "topic": "STMS1/pqstop", "A": 1.5}},
            {"asset": "STMS1", "readings": {"A": 2.5}},
            {"readings": {"timestamp": "t3", "topic": "STMS1/pqstop"}},
            {"asset": "STMS1", "readings": {"timestamp": "t4", "topic": "STMS1/pqstop", "A": 3.5}}
        ]"#;
        assert_eq!(b.publish_payload(north).await.unwrap(), 2);
        assert!(sub.receiver.recv().await.unwrap().contains("\"t1\""));
        assert!(sub.receiver.recv().await.unwrap().contains("\"t4\""));
    }

    #[tokio::test]
    async fn test_rejects_scalar_payloads() {
        let b = Broadcaster::default();
        assert!(matches!(
            b.publish_payload("42").await,
            Err(BroadcastError::UnsupportedPayload(_))
        ));
        assert!(matches!(
            b.publish_payload("{oops").await,
            Err(BroadcastError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn test_topic_without_category() {
        let b = Broadcaster::default();
        let _sub = b.subscribe(SubscriberKey::new("STMS1", "adstop")).await;
        assert_eq!(b.publish(&reading("STMS1", "adstop")).await, 0);
    }
}
