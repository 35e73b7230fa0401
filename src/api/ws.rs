// =============================================================================
// WebSocket handler — newData push channel
// =============================================================================
//
// Clients connect to `/ws` and receive one frame per value-history insert:
//
//   {"event":"newData","symbol":"ivoire","value":42.0,"timestamp":"..."}
//
// Delivery is best-effort. A subscriber that falls behind the broadcast
// buffer skips the missed events and keeps receiving; there is no replay for
// late connections. The handler also answers Ping frames with Pong and
// cleans up on disconnect.
// =============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::rest::ApiContext;
use crate::publisher::ChangePublisher;
use crate::sheets::SnapshotSource;
use crate::types::ChangeEvent;

// =============================================================================
// Upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler<S>(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext<S>>,
) -> impl IntoResponse
where
    S: SnapshotSource,
{
    info!("WebSocket connection accepted — upgrading");
    let publisher = ctx.state.publisher.clone();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, publisher))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two concurrent arms via `tokio::select!`:
///   1. **Push arm** — forward each broadcast ChangeEvent as a newData frame.
///   2. **Recv arm** — process incoming client messages (Ping, Close).
async fn handle_ws_connection(socket: WebSocket, publisher: ChangePublisher) {
    let mut rx = publisher.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // ── Push arm: forward change events ─────────────────────────
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        match serialize_frame(&event) {
                            Ok(json) => {
                                if let Err(e) = sender.send(Message::Text(json)).await {
                                    debug!(error = %e, "WebSocket send failed — disconnecting");
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to serialize change event");
                            }
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Best-effort contract: skip what was missed, keep going.
                        warn!(missed, "WebSocket subscriber lagged — events skipped");
                    }
                    Err(RecvError::Closed) => {
                        info!("change channel closed — disconnecting WebSocket");
                        break;
                    }
                }
            }

            // ── Recv arm: process incoming messages ─────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text/Binary/Pong from the client carry no meaning here.
                        debug!("WebSocket client message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Serialize a ChangeEvent into the newData wire frame.
fn serialize_frame(event: &ChangeEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(&serde_json::json!({
        "event": "newData",
        "symbol": event.symbol,
        "value": event.value,
        "timestamp": event.timestamp.to_rfc3339(),
    }))
}

// =============================================================================
// Tests
// =============================================================================
