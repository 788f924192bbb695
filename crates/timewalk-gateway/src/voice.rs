//! `/ws/voice`: one [`VoiceSession`] per WebSocket.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::future::ready;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use timewalk_voice::{drain_to, ClientSink, VoiceSession};

const WRITER_GRACE: Duration = Duration::from_secs(2);

pub async fn voice_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!(target: "timewalk::gateway", "[VOICE] WebSocket connected");
    let (sender, receiver) = socket.split();

    let (client, outbound) = ClientSink::channel();
    let sink = sender.with(|text: String| ready(Ok::<_, axum::Error>(Message::Text(text))));
    let mut writer = tokio::spawn(drain_to(outbound, sink));

    // Text frames only; the stream ends at the first close or transport error.
    let inbound = receiver
        .take_while(|msg| ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            ready(match msg {
                Ok(Message::Text(text)) => Some(text),
                _ => None,
            })
        });

    let session = VoiceSession::new(state.config.voice.clone(), state.services.clone())
        .with_world_tracking(state.world_tracking);
    if let Err(e) = session.run(inbound, client).await {
        tracing::warn!(target: "timewalk::gateway", "[VOICE] session ended with error: {}", e);
    }

    // Give the writer a moment to flush what is queued, then stop it.
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    tracing::info!(target: "timewalk::gateway", "[VOICE] WebSocket closed");
}
