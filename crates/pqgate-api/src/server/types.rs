//! Shared server state.

use std::sync::Arc;

use pqgate_devices::MqttAdapter;
use pqgate_filters::{FilterStages, Pipeline};

use crate::broadcast::Broadcaster;

/// Maximum accepted request body (filter configuration documents).
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;

/// State handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    pub broadcaster: Arc<Broadcaster>,
    pub stages: Arc<FilterStages>,
    pub pipeline: Option<Arc<Pipeline>>,
    pub mqtt: Option<Arc<MqttAdapter>>,
    /// Unix timestamp of server start
    pub started_at: i64,
}

impl ServerState {
    pub fn new(broadcaster: Arc<Broadcaster>, stages: Arc<FilterStages>) -> Self {
        Self {
            broadcaster,
            stages,
            pipeline: None,
            mqtt: None,
            started_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_mqtt(mut self, mqtt: Arc<MqttAdapter>) -> Self {
        self.mqtt = Some(mqtt);
        self
    }
}
