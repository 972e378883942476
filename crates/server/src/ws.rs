use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use switchboard_core::realtime::RealtimeSubscription;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::routes::AppState;

/// `GET /ws`: one JSON text frame per hub event, for as long as the client
/// stays connected.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state.hub.subscribe()))
}

async fn stream_events(socket: WebSocket, mut subscription: RealtimeSubscription) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = Uuid::new_v4().to_string();
    debug!(event_name = "realtime.client.connected", correlation_id = %client_id, "realtime client connected");

    loop {
        tokio::select! {
            envelope = subscription.next() => {
                let Some(envelope) = envelope else { break };
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(event = %envelope.event, error = %error, "realtime event could not be encoded");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // The channel is server-to-client only.
                Some(Ok(_)) => {}
            }
        }
    }

    debug!(event_name = "realtime.client.disconnected", correlation_id = %client_id, "realtime client disconnected");
}
