//! Basic handlers - health check and broadcast statistics.

use axum::{extract::State, Json};
use pqgate_devices::ConnectionStatus;
use pqgate_filters::PipelineStats;
use serde::Serialize;

use super::ServerState;
use crate::broadcast::BroadcastStats;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime: u64,
    /// South transport status, absent when MQTT is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<ConnectionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineStats>,
}

pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    let uptime = chrono::Utc::now().timestamp() - state.started_at;

    Json(HealthStatus {
        status: "ok",
        service: "pqgate",
        version: env!("CARGO_PKG_VERSION"),
        uptime: uptime.max(0) as u64,
        mqtt: state.mqtt.as_ref().map(|m| m.connection_status()),
        pipeline: state.pipeline.as_ref().map(|p| p.stats()),
    })
}

pub async fn broadcast_stats_handler(State(state): State<ServerState>) -> Json<BroadcastStats> {
    Json(state.broadcaster.stats())
}
