//! Command-line interface for the pqgate telemetry gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pqgate_api::{Broadcaster, ServerState};
use pqgate_core::logging::{init_logging, json_requested};
use pqgate_core::{
    AppConfig, DynLatestReadingSource, DynReadingSink, LogSink, MemoryReadingSource,
};
use pqgate_devices::mqtt::resolve_asset;
use pqgate_devices::{decode_message, HttpIngestSink, HttpLatestReadingSource, MqttAdapter};
use pqgate_filters::{FilterStages, Pipeline};
use tracing::{info, warn};

/// pqgate - decode, enrich and fan out substation telemetry.
#[derive(Parser, Debug)]
#[command(name = "pqgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway: MQTT south adapter, pipeline and web server.
    Serve {
        /// Configuration file (defaults to $PQGATE_CONFIG or ./pqgate.toml).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Decode one hex encoded frame and print it as canonical JSON.
    Decode {
        /// Topic the frame was published on; selects the layout.
        #[arg(short, long)]
        topic: String,
        /// Asset name (defaults to the first topic segment).
        #[arg(short, long)]
        asset: Option<String>,
        /// Frame bytes as hex.
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(json_requested());

    match args.command {
        Command::Serve { config, host, port } => run_server(config, host, port).await,
        Command::Decode {
            topic,
            asset,
            payload,
        } => {
            println!("{}", decode_hex(&topic, asset.as_deref(), &payload)?);
            Ok(())
        }
    }
}

/// Parse hex with optional `0x` prefix and embedded whitespace.
fn parse_hex(payload: &str) -> Result<Vec<u8>> {
    let cleaned: String = payload.split_whitespace().collect();
    let cleaned = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    hex::decode(cleaned).context("payload is not valid hex")
}

fn decode_hex(topic: &str, asset: Option<&str>, payload: &str) -> Result<String> {
    let bytes = parse_hex(payload)?;
    let asset = asset
        .map(str::to_string)
        .unwrap_or_else(|| resolve_asset(topic, &[]));

    let Some(reading) = decode_message(&asset, topic, &bytes) else {
        bail!("topic {:?} does not name a known frame kind", topic);
    };
    if reading.is_raw() {
        warn!(len = bytes.len(), topic = %topic, "Payload length matches no layout, showing raw bytes");
    }
    Ok(serde_json::to_string_pretty(&reading.canonical())?)
}

async fn run_server(config: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let path = AppConfig::resolve_path(config);
    let mut config = AppConfig::load(&path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    info!(config = %path.display(), "Configuration loaded");

    let timeout = Duration::from_millis(config.collaborators.timeout_ms);

    let source: DynLatestReadingSource = match &config.collaborators.latest_reading_url {
        Some(url) => Arc::new(HttpLatestReadingSource::new(url.as_str(), timeout)?),
        None => {
            warn!("No latest_reading_url configured, digital state starts empty for every asset");
            Arc::new(MemoryReadingSource::new())
        }
    };
    let sink: DynReadingSink = match &config.collaborators.ingest_url {
        Some(url) => Arc::new(HttpIngestSink::new(url.as_str(), timeout)?),
        None => Arc::new(LogSink),
    };

    let stages = Arc::new(FilterStages::from_config(&config.filters, source, timeout)?);
    let broadcaster = Arc::new(Broadcaster::new(&config.broadcast));
    let pipeline = Arc::new(Pipeline::new(stages.clone(), sink).with_publisher(broadcaster.clone()));

    let mut state = ServerState::new(broadcaster, stages).with_pipeline(pipeline.clone());

    let mqtt = if config.mqtt.enabled && !config.mqtt.subscriptions.is_empty() {
        let adapter = Arc::new(MqttAdapter::new(config.mqtt.clone(), pipeline));
        adapter.start().await?;
        state = state.with_mqtt(adapter.clone());
        Some(adapter)
    } else {
        if config.mqtt.enabled {
            warn!("No MQTT subscriptions configured, south adapter not started");
        }
        info!("Serving the broadcast endpoint only");
        None
    };

    let bind: SocketAddr = config
        .server
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_addr()))?;

    let served = pqgate_api::run(bind, state).await;

    if let Some(adapter) = mqtt {
        if let Err(e) = adapter.stop().await {
            warn!(error = %e, "Failed to stop MQTT adapter");
        }
    }
    served
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADS_HEX: &str = "0000803f000000400000404000008040 1e0f09030f061800 01";

    #[test]
    fn test_parse_hex_variants() {
        assert_eq!(parse_hex("0x0aff").unwrap(), vec![0x0a, 0xff]);
        assert_eq!(parse_hex("0a ff\n01").unwrap(), vec![0x0a, 0xff, 0x01]);
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_decode_analog_hex() {
        let json = decode_hex("STMS1/adstop", None, ADS_HEX).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["timestamp"], "2024-06-15 09:15:30");
        assert_eq!(value["topic"], "STMS1/adstop");
        assert_eq!(value["ANASEN_CH4"], 4.0);
        assert_eq!(value["IsNlf"], true);
    }

    #[test]
    fn test_decode_unknown_topic() {
        assert!(decode_hex("STMS1/status", None, "00").is_err());
    }
}
