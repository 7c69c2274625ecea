//! HTTP and WebSocket handlers.

pub mod basic;
pub mod filters;
pub mod ws;

pub use crate::server::ServerState;
