//! pqgate HTTP surface: the topic-keyed broadcaster, its WebSocket
//! endpoint, filter reconfiguration and health endpoints.

pub mod broadcast;
pub mod error;
pub mod handlers;
pub mod server;

pub use broadcast::{BroadcastStats, Broadcaster, SubscriberKey, Subscription};
pub use error::{ApiError, ApiResult, BroadcastError};
pub use server::{create_router, run, serve, ServerState};
