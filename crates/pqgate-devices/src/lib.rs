//! South side of pqgate: frame layouts, the binary decoder, the MQTT
//! adapter and the HTTP collaborators.

pub mod adapter;
pub mod decoder;
pub mod error;
pub mod http;
pub mod layout;
pub mod mqtt;

pub use adapter::{AssetWorkers, ConnectionStatus, FrameHandler, SouthMessage};
pub use decoder::{decode, decode_message, try_decode, Decoded, TimeBlock};
pub use error::{AdapterError, AdapterResult, DecodeError};
pub use http::{HttpIngestSink, HttpLatestReadingSource};
pub use layout::{Entry, Layout, Primitive};
pub use mqtt::MqttAdapter;
