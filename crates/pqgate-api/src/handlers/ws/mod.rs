//! WebSocket fan-out endpoint.
//!
//! `GET /ws/:asset/:topic` upgrades to a WebSocket registered under
//! `(asset, topic)`. Readings published for that key are forwarded to the
//! peer. Text frames from the peer are publish payloads and are routed by
//! their own asset and topic.

pub mod connection_state;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, SubscriberKey, Subscription};
use crate::server::ServerState;

pub async fn subscribe_handler(
    State(state): State<ServerState>,
    Path((asset, topic)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| serve_subscriber(socket, broadcaster, SubscriberKey::new(asset, topic)))
}

async fn serve_subscriber(socket: WebSocket, broadcaster: Arc<Broadcaster>, key: SubscriberKey) {
    let Subscription {
        id,
        key,
        mut receiver,
        connection,
    } = broadcaster.subscribe(key).await;
    let send_timeout = broadcaster.send_timeout();
    let (mut sink, mut stream) = socket.split();

    // Peer payloads are published off this loop; `receiver` must keep
    // draining while a publish waits on subscribers, this one included.
    let (publish_tx, mut publish_rx) = mpsc::unbounded_channel::<String>();
    let publisher = {
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            while let Some(text) = publish_rx.recv().await {
                if let Err(e) = broadcaster.publish_payload(&text).await {
                    warn!(subscriber = %id, error = %e, "Ignoring publish payload");
                }
            }
        })
    };

    loop {
        tokio::select! {
            outgoing = receiver.recv() => {
                // None once the broadcaster has dropped this subscriber.
                let Some(text) = outgoing else { break };
                match tokio::time::timeout(send_timeout, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => connection.record_sent(),
                    Ok(Err(e)) => {
                        debug!(subscriber = %id, error = %e, "WebSocket send failed");
                        break;
                    }
                    Err(_) => {
                        warn!(subscriber = %id, "WebSocket send timed out");
                        break;
                    }
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        connection.record_received();
                        if publish_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(subscriber = %id, error = %e, "WebSocket protocol error");
                        break;
                    }
                }
            }
        }
    }

    connection.mark_closed().await;
    broadcaster.unsubscribe(&key, id);
    drop(publish_tx);
    if let Err(e) = sink.close().await {
        debug!(subscriber = %id, error = %e, "WebSocket close failed");
    }
    // Payloads already accepted from the peer are still published.
    if let Err(e) = publisher.await {
        warn!(subscriber = %id, error = %e, "Publish task failed");
    }

    let sent = connection.stats().await.messages_sent;
    info!(
        asset = %key.asset,
        category = %key.category,
        subscriber = %id,
        sent,
        "Subscriber disconnected"
    );
}
