// WebSocket transport for the annotated video stream

use crate::broadcaster::{FrameSink, SinkError, StreamMessage};
use crate::http::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tracing::{debug, info};

/// `GET /ws/video`
pub async fn video_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

struct WebSocketSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, message: StreamMessage) -> Result<(), SinkError> {
        let json = serde_json::to_string(&message).map_err(|e| SinkError(e.to_string()))?;
        self.sender
            .send(Message::Text(json))
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let broadcaster = state.services.broadcaster.clone();
    let session_id = broadcaster.register();

    let (sender, mut receiver) = socket.split();
    let mut sink = WebSocketSink { sender };

    // Inbound messages are ignored; the reader only watches for the client going away.
    let closed = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        end = broadcaster.run_session(&session_id, &mut sink) => {
            debug!("Stream for {} stopped: {:?}", session_id, end);
        }
        _ = closed => {
            info!("Client {} closed the stream", session_id);
        }
    }

    broadcaster.unregister(&session_id);
    let _ = sink.sender.close().await;
}
