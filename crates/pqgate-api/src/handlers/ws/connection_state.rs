//! WebSocket connection state tracking.
//!
//! Lifecycle is `Connecting -> Open -> Closed`; `Closed` is terminal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Upgrade accepted, not yet registered
    Connecting,
    /// Registered with the broadcaster
    Open,
    /// Disconnected, errored or dropped after a failed send
    Closed,
}

/// Per-connection metadata.
#[derive(Debug)]
pub struct ConnectionMetadata {
    pub state: RwLock<ConnectionState>,
    pub connected_at: Instant,
    /// Messages written to the peer
    pub messages_sent: AtomicU64,
    /// Messages received from the peer
    pub messages_received: AtomicU64,
    pub is_alive: AtomicBool,
}

impl Default for ConnectionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMetadata {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Connecting),
            connected_at: Instant::now(),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            is_alive: AtomicBool::new(true),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Move to `Open`. Has no effect once closed.
    pub async fn open(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = ConnectionState::Open;
        true
    }

    pub async fn mark_closed(&self) {
        self.is_alive.store(false, Ordering::Relaxed);
        *self.state.write().await = ConnectionState::Closed;
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub async fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state().await,
            uptime_secs: self.uptime().as_secs(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

/// Connection statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub uptime_secs: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle() {
        let meta = ConnectionMetadata::new();
        assert_eq!(meta.state().await, ConnectionState::Connecting);
        assert!(meta.open().await);
        assert_eq!(meta.state().await, ConnectionState::Open);

        meta.mark_closed().await;
        assert!(!meta.is_alive());
        // Closed is terminal.
        assert!(!meta.open().await);
        assert_eq!(meta.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_counters() {
        let meta = ConnectionMetadata::new();
        meta.record_sent();
        meta.record_sent();
        meta.record_received();
        let stats = meta.stats().await;
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_received, 1);
    }
}
