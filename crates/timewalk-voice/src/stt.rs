//! **Transcription relay**: client audio in, transcript fragments and
//! inactivity estimates out.
//!
//! One recognizer session lives for the whole connection. Audio from the
//! client arrives base64-encoded and is forwarded as-is; recognizer frames are
//! decoded into [`RecognizerEvent`]s for the session loop, which feeds them to
//! the turn detector.

use crate::error::{VoiceError, VoiceResult};
use crate::turn::InactivityEstimate;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

pub const GRADIUM_STT_URL: &str = "wss://us.api.gradium.ai/api/speech/asr";

/// Events produced by the recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    /// A recognized text fragment
    Text(String),
    /// One step of inactivity estimates keyed by horizon
    Step(Vec<InactivityEstimate>),
    /// The recognizer accepted the setup
    Ready,
    /// The recognizer closed its stream
    EndOfStream,
}

#[derive(Debug, Deserialize)]
struct SttFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    vad: Vec<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// One `vad` entry. A missing probability counts as zero; entries without a
/// horizon are unusable and skipped.
fn estimate_from(entry: &Value) -> Option<InactivityEstimate> {
    let horizon_s = entry.get("horizon_s")?.as_f64()? as f32;
    let inactivity_prob = entry
        .get("inactivity_prob")
        .and_then(Value::as_f64)
        .unwrap_or(0.0) as f32;
    Some(InactivityEstimate {
        horizon_s,
        inactivity_prob,
    })
}

/// Decode one recognizer frame. Unknown kinds decode to `Ok(None)`.
pub fn parse_event(raw: &str) -> VoiceResult<Option<RecognizerEvent>> {
    let frame: SttFrame = serde_json::from_str(raw)?;
    let event = match frame.kind.as_str() {
        "text" => match frame.text {
            Some(text) if !text.trim().is_empty() => RecognizerEvent::Text(text),
            _ => return Ok(None),
        },
        "step" => RecognizerEvent::Step(frame.vad.iter().filter_map(estimate_from).collect()),
        "ready" => RecognizerEvent::Ready,
        "end_of_stream" => RecognizerEvent::EndOfStream,
        "error" => {
            return Err(VoiceError::Stt(
                frame.message.unwrap_or_else(|| "unspecified recognizer error".to_string()),
            ))
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Write half of a recognizer session.
#[async_trait]
pub trait SttSink: Send {
    /// Forward one PCM chunk (24kHz, 16-bit, mono).
    async fn send_audio(&mut self, pcm: &[u8]) -> VoiceResult<()>;

    /// Release the session. Never fails.
    async fn close(&mut self);
}

pub struct SttSession {
    pub sink: Box<dyn SttSink>,
    pub events: BoxStream<'static, VoiceResult<RecognizerEvent>>,
}

impl std::fmt::Debug for SttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttSession").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait SttConnector: Send + Sync {
    async fn open(&self) -> VoiceResult<SttSession>;
}

/// The connection's recognizer session as seen by the session loop.
pub struct TranscriptionRelay {
    session: SttSession,
    closed: bool,
}

impl TranscriptionRelay {
    pub async fn open(connector: &dyn SttConnector) -> VoiceResult<Self> {
        let session = connector.open().await?;
        info!(target: "timewalk::stt", "🎤 Recognizer session open");
        Ok(Self {
            session,
            closed: false,
        })
    }

    /// Decode a client `audio` payload and forward it.
    pub async fn forward_audio(&mut self, data_b64: &str) -> VoiceResult<()> {
        let pcm = BASE64.decode(data_b64)?;
        if pcm.is_empty() {
            return Ok(());
        }
        self.session.sink.send_audio(&pcm).await
    }

    /// Next recognizer event. A closed stream surfaces as [`VoiceError::SttClosed`].
    pub async fn next_event(&mut self) -> VoiceResult<RecognizerEvent> {
        match self.session.events.next().await {
            Some(Ok(RecognizerEvent::EndOfStream)) | None => Err(VoiceError::SttClosed),
            Some(event) => event,
        }
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.sink.close().await;
        debug!(target: "timewalk::stt", "recognizer session closed");
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gradium streaming ASR over WebSocket.
#[derive(Debug, Clone)]
pub struct GradiumStt {
    pub url: String,
    pub api_key: String,
    pub model_name: String,
    pub language: String,
}

impl GradiumStt {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            url: GRADIUM_STT_URL.to_string(),
            api_key: api_key.into(),
            model_name: "default".to_string(),
            language: "en".to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

struct GradiumSttSink {
    write: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl SttSink for GradiumSttSink {
    async fn send_audio(&mut self, pcm: &[u8]) -> VoiceResult<()> {
        let frame = json!({"type": "audio", "audio": BASE64.encode(pcm)});
        self.write.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.write.close().await {
            debug!(target: "timewalk::stt", "close: {}", e);
        }
    }
}

#[async_trait]
impl SttConnector for GradiumStt {
    async fn open(&self) -> VoiceResult<SttSession> {
        let mut request = self.url.as_str().into_client_request()?;
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| VoiceError::Config(format!("invalid api key header: {}", e)))?;
        request.headers_mut().insert("x-api-key", key);

        let (ws, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::Stt(format!("connect failed: {}", e)))?;
        let (mut write, read) = ws.split();

        // Setup must be the first frame; the server closes the socket otherwise.
        let setup = json!({
            "type": "setup",
            "model_name": self.model_name,
            "input_format": "pcm",
            "language": self.language,
        });
        write.send(Message::Text(setup.to_string())).await?;

        let events = recognizer_events(read);

        Ok(SttSession {
            sink: Box::new(GradiumSttSink { write, closed: false }),
            events,
        })
    }
}

/// Decode recognizer socket frames. Undecodable frames are skipped; an
/// `error` frame or a transport error ends the stream with that error.
fn recognizer_events<S>(mut read: S) -> BoxStream<'static, VoiceResult<RecognizerEvent>>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
{
    let events = async_stream::stream! {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(raw)) => match parse_event(&raw) {
                    Ok(Some(event)) => {
                        if let RecognizerEvent::Step(ref steps) = event {
                            trace!(target: "timewalk::stt", ?steps, "step");
                        }
                        let done = event == RecognizerEvent::EndOfStream;
                        yield Ok(event);
                        if done {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e @ VoiceError::Stt(_)) => {
                        yield Err(e);
                        break;
                    }
                    Err(e) => warn!(target: "timewalk::stt", "skipping undecodable recognizer frame: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    yield Err(VoiceError::from(e));
                    break;
                }
            }
        }
    };
    events.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::{Arc, Mutex};

    #[test]
    fn parses_recognizer_frames() {
        assert_eq!(
            parse_event(r#"{"type":"text","text":"ancient Rome"}"#).unwrap(),
            Some(RecognizerEvent::Text("ancient Rome".into()))
        );
        assert_eq!(
            parse_event(r#"{"type":"step","vad":[{"horizon_s":0.5,"inactivity_prob":0.2},{"horizon_s":2.0,"inactivity_prob":0.85}]}"#)
                .unwrap(),
            Some(RecognizerEvent::Step(vec![
                InactivityEstimate { horizon_s: 0.5, inactivity_prob: 0.2 },
                InactivityEstimate { horizon_s: 2.0, inactivity_prob: 0.85 },
            ]))
        );
        assert_eq!(parse_event(r#"{"type":"step"}"#).unwrap(), Some(RecognizerEvent::Step(vec![])));
        assert_eq!(parse_event(r#"{"type":"ready"}"#).unwrap(), Some(RecognizerEvent::Ready));
        assert_eq!(parse_event(r#"{"type":"flush_done"}"#).unwrap(), None);
        assert!(matches!(
            parse_event(r#"{"type":"error","message":"bad audio"}"#),
            Err(VoiceError::Stt(m)) if m == "bad audio"
        ));
    }

    #[test]
    fn step_keeps_usable_estimates_only() {
        assert_eq!(
            parse_event(
                r#"{"type":"step","vad":[{"horizon_s":2.0,"inactivity_prob":0.9},{"horizon_s":0.5},"noise",{"inactivity_prob":0.4}]}"#
            )
            .unwrap(),
            Some(RecognizerEvent::Step(vec![
                InactivityEstimate { horizon_s: 2.0, inactivity_prob: 0.9 },
                InactivityEstimate { horizon_s: 0.5, inactivity_prob: 0.0 },
            ]))
        );
        // undecodable frames are errors the stream skips, not recognizer failures
        assert!(matches!(parse_event("not json"), Err(VoiceError::Json(_))));
    }

    #[tokio::test]
    async fn bad_frame_does_not_end_the_stream() {
        let frames = stream::iter(vec![
            Ok(Message::Text(r#"{"type":"text","text":"Take me"}"#.into())),
            Ok(Message::Text(r#"{"type":"step","vad":"garbled"}"#.into())),
            Ok(Message::Text("{oops".into())),
            Ok(Message::Text(r#"{"type":"text","text":"to Rome"}"#.into())),
            Ok(Message::Text(r#"{"type":"error","message":"quota"}"#.into())),
            Ok(Message::Text(r#"{"type":"text","text":"never seen"}"#.into())),
        ]);
        let events: Vec<_> = recognizer_events(frames).collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().unwrap(), &RecognizerEvent::Text("Take me".into()));
        assert_eq!(events[1].as_ref().unwrap(), &RecognizerEvent::Text("to Rome".into()));
        assert!(matches!(&events[2], Err(VoiceError::Stt(m)) if m == "quota"));
    }

    struct RecordingSink(Arc<Mutex<Vec<Vec<u8>>>>);

    #[async_trait]
    impl SttSink for RecordingSink {
        async fn send_audio(&mut self, pcm: &[u8]) -> VoiceResult<()> {
            self.0.lock().unwrap().push(pcm.to_vec());
            Ok(())
        }
        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn relay_decodes_audio_and_reports_close() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let session = SttSession {
            sink: Box::new(RecordingSink(sent.clone())),
            events: stream::iter(vec![Ok(RecognizerEvent::Text("hi".into()))]).boxed(),
        };
        let mut relay = TranscriptionRelay {
            session,
            closed: false,
        };
        relay.forward_audio("AQID").await.unwrap();
        assert!(relay.forward_audio("not base64!").await.is_err());
        assert_eq!(sent.lock().unwrap().as_slice(), &[vec![1u8, 2, 3]]);

        assert_eq!(relay.next_event().await.unwrap(), RecognizerEvent::Text("hi".into()));
        assert!(matches!(relay.next_event().await, Err(VoiceError::SttClosed)));
    }
}
