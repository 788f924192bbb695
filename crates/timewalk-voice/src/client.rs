//! **Client multiplexer**: the single ordered channel to the browser.
//!
//! Every component formats outbound events through a cloned [`ClientSink`].
//! One unbounded queue feeds one writer, so events sent from one task reach
//! the client in the order they were sent. Sending never awaits: a response
//! cycle cannot stall on a slow client.

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{ResponseId, ServerMessage};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientSink {
    /// Create a sink and the receiver its writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, msg: ServerMessage) -> VoiceResult<()> {
        self.tx.send(msg).map_err(|_| VoiceError::ClientClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn transcript(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.send(ServerMessage::Transcript {
            text: text.into(),
            partial: false,
        })
    }

    pub fn response_start(&self, response_id: &ResponseId) -> VoiceResult<()> {
        self.send(ServerMessage::ResponseStart {
            response_id: response_id.clone(),
        })
    }

    pub fn guide_text(&self, response_id: &ResponseId, text: impl Into<String>) -> VoiceResult<()> {
        self.send(ServerMessage::GuideText {
            response_id: response_id.clone(),
            text: text.into(),
        })
    }

    /// Raw PCM is base64-encoded and tagged with its response.
    pub fn audio(&self, response_id: &ResponseId, pcm: &[u8]) -> VoiceResult<()> {
        self.send(ServerMessage::Audio {
            response_id: response_id.clone(),
            data: BASE64.encode(pcm),
        })
    }

    pub fn word_timestamp(
        &self,
        response_id: &ResponseId,
        text: impl Into<String>,
        start: f64,
        stop: f64,
    ) -> VoiceResult<()> {
        self.send(ServerMessage::WordTimestamp {
            response_id: response_id.clone(),
            text: text.into(),
            start,
            stop,
        })
    }

    pub fn interrupt(&self, response_id: &ResponseId) -> VoiceResult<()> {
        self.send(ServerMessage::Interrupt {
            response_id: response_id.clone(),
        })
    }

    pub fn error(&self, message: impl Into<String>) -> VoiceResult<()> {
        self.send(ServerMessage::Error {
            message: message.into(),
        })
    }
}

/// Writer loop: serialize queued messages onto `sink` until the queue closes
/// or the sink fails.
pub async fn drain_to<S>(mut rx: mpsc::UnboundedReceiver<ServerMessage>, mut sink: S)
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    while let Some(msg) = rx.recv().await {
        let text = match msg.to_json() {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "timewalk::client", kind = msg.kind(), "serialize failed: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(text).await {
            debug!(target: "timewalk::client", "client writer stopped: {}", e);
            break;
        }
    }
    rx.close();
}
