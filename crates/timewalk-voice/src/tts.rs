//! Text-to-speech sessions.
//!
//! A [`TtsConnector`] opens one streaming session per response cycle. The
//! session is split into a [`TtsSink`] (text in) and an event stream (audio
//! and word timings out) so the relay can forward audio while text is still
//! being written.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{BoxStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

/// Emma, English, US.
pub const DEFAULT_VOICE_ID: &str = "YTpq7expH9539ERJ";

pub const GRADIUM_TTS_URL: &str = "wss://us.api.gradium.ai/api/speech/tts";

/// Events produced by a synthesis session.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// Raw PCM (48kHz, 16-bit, mono)
    Audio(Vec<u8>),
    /// Timing of one spoken word, in seconds from the start of the session
    Timestamp { text: String, start_s: f64, stop_s: f64 },
    /// The session has produced everything it will produce
    End,
}

/// Write half of a synthesis session.
#[async_trait]
pub trait TtsSink: Send + Sync {
    async fn send_text(&mut self, text: &str) -> VoiceResult<()>;

    /// Signal that no more text follows. Buffered audio is still delivered.
    async fn end_input(&mut self) -> VoiceResult<()>;

    /// Release the session. Never fails.
    async fn close(&mut self);
}

pub struct TtsSession {
    pub sink: Box<dyn TtsSink>,
    pub events: BoxStream<'static, VoiceResult<SynthesisEvent>>,
}

impl std::fmt::Debug for TtsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsSession").finish_non_exhaustive()
    }
}

/// Opens synthesis sessions. Opening may fail when the provider is at capacity.
#[async_trait]
pub trait TtsConnector: Send + Sync {
    async fn open(&self, voice_id: &str) -> VoiceResult<TtsSession>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gradium streaming TTS over WebSocket.
#[derive(Debug, Clone)]
pub struct GradiumTts {
    pub url: String,
    pub api_key: String,
    pub model_name: String,
}

impl GradiumTts {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            url: GRADIUM_TTS_URL.to_string(),
            api_key: api_key.into(),
            model_name: "default".to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TtsFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    start_s: Option<f64>,
    #[serde(default)]
    stop_s: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode one text frame. `Ok(None)` for frames that carry nothing to relay.
fn parse_frame(raw: &str) -> VoiceResult<Option<SynthesisEvent>> {
    let frame: TtsFrame = serde_json::from_str(raw)?;
    match frame.kind.as_str() {
        "audio" => match frame.audio {
            Some(b64) if !b64.is_empty() => Ok(Some(SynthesisEvent::Audio(BASE64.decode(b64)?))),
            _ => Ok(None),
        },
        "text" | "timestamp" => match (frame.text, frame.start_s, frame.stop_s) {
            (Some(text), Some(start_s), Some(stop_s)) => Ok(Some(SynthesisEvent::Timestamp {
                text,
                start_s,
                stop_s,
            })),
            _ => Ok(None),
        },
        "end_of_stream" => Ok(Some(SynthesisEvent::End)),
        "error" => Err(VoiceError::Tts(
            frame.message.unwrap_or_else(|| "unspecified synthesis error".to_string()),
        )),
        other => {
            trace!(target: "timewalk::tts", "ignoring frame type {}", other);
            Ok(None)
        }
    }
}

struct GradiumTtsSink {
    write: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl TtsSink for GradiumTtsSink {
    async fn send_text(&mut self, text: &str) -> VoiceResult<()> {
        let frame = json!({"type": "text", "text": text});
        self.write.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn end_input(&mut self) -> VoiceResult<()> {
        let frame = json!({"type": "end_of_stream"});
        self.write.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.write.close().await {
            debug!(target: "timewalk::tts", "close: {}", e);
        }
    }
}

fn event_stream(mut read: SplitStream<WsStream>) -> BoxStream<'static, VoiceResult<SynthesisEvent>> {
    let stream = async_stream::stream! {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(raw)) => match parse_frame(&raw) {
                    Ok(Some(SynthesisEvent::End)) => {
                        yield Ok(SynthesisEvent::End);
                        break;
                    }
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                },
                Ok(Message::Binary(bytes)) => yield Ok(SynthesisEvent::Audio(bytes)),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    yield Err(VoiceError::from(e));
                    break;
                }
            }
        }
    };
    stream.boxed()
}

#[async_trait]
impl TtsConnector for GradiumTts {
    async fn open(&self, voice_id: &str) -> VoiceResult<TtsSession> {
        let mut request = self.url.as_str().into_client_request()?;
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| VoiceError::Config(format!("invalid api key header: {}", e)))?;
        request.headers_mut().insert("x-api-key", key);

        let (ws, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::SynthesisUnavailable(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let setup = json!({
            "type": "setup",
            "voice_id": voice_id,
            "model_name": self.model_name,
            "output_format": "pcm",
        });
        write.send(Message::Text(setup.to_string())).await?;

        // Capacity limits surface as an error (or a close) in place of `ready`.
        match read.next().await {
            Some(Ok(Message::Text(raw))) => {
                let frame: TtsFrame = serde_json::from_str(&raw)?;
                if frame.kind != "ready" {
                    let reason = frame.message.unwrap_or(frame.kind);
                    let _ = write.close().await;
                    return Err(VoiceError::SynthesisUnavailable(reason));
                }
            }
            Some(Ok(other)) => {
                warn!(target: "timewalk::tts", "unexpected handshake frame: {:?}", other);
                let _ = write.close().await;
                return Err(VoiceError::SynthesisUnavailable("no ready frame".to_string()));
            }
            Some(Err(e)) => return Err(VoiceError::SynthesisUnavailable(e.to_string())),
            None => return Err(VoiceError::SynthesisUnavailable("closed during setup".to_string())),
        }
        debug!(target: "timewalk::tts", voice_id, "synthesis session ready");

        Ok(TtsSession {
            sink: Box::new(GradiumTtsSink { write, closed: false }),
            events: event_stream(read),
        })
    }
}
