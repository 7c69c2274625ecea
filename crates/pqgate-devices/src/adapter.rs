//! South adapter plumbing shared by transports.
//!
//! A transport turns each incoming message into a [`SouthMessage`] and
//! hands it to [`AssetWorkers`], which keeps one sequential task per asset
//! so frames of one asset are processed in arrival order while different
//! assets proceed independently.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One message received from the south transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SouthMessage {
    pub asset: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl SouthMessage {
    pub fn new(asset: impl Into<String>, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            asset: asset.into(),
            topic: topic.into(),
            payload,
        }
    }
}

/// Consumer of south messages, called from the asset's worker task.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle(&self, message: SouthMessage);
}

/// Transport connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Per-asset sequential workers.
pub struct AssetWorkers {
    handler: Arc<dyn FrameHandler>,
    queues: DashMap<String, mpsc::Sender<SouthMessage>>,
    capacity: usize,
}

impl AssetWorkers {
    pub fn new(handler: Arc<dyn FrameHandler>, capacity: usize) -> Self {
        Self {
            handler,
            queues: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue a message on its asset's worker, spawning the worker on first use.
    ///
    /// Never waits: when the asset's queue is full the message is dropped
    /// and `false` is returned.
    pub fn dispatch(&self, message: SouthMessage) -> bool {
        let asset = message.asset.clone();
        let mut message = message;

        // A worker whose receiver is gone is replaced once.
        for _ in 0..2 {
            let sender = self
                .queues
                .entry(asset.clone())
                .or_insert_with(|| self.spawn_worker(&asset))
                .clone();

            match sender.try_send(message) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(asset = %asset, "Asset worker queue full, dropping frame");
                    return false;
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    self.queues.remove(&asset);
                    message = returned;
                }
            }
        }
        false
    }

    fn spawn_worker(&self, asset: &str) -> mpsc::Sender<SouthMessage> {
        let (tx, mut rx) = mpsc::channel::<SouthMessage>(self.capacity);
        let handler = self.handler.clone();
        let asset = asset.to_string();
        debug!(asset = %asset, "Starting asset worker");
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler.handle(message).await;
            }
            debug!(asset = %asset, "Asset worker stopped");
        });
        tx
    }

    /// Number of assets with a live worker.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Drop every worker queue; workers exit once drained.
    pub fn shutdown(&self) {
        self.queues.clear();
    }
}
