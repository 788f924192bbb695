//! **Speech synthesis relay** — one TTS session per response cycle.
//!
//! Text fragments from the dialogue engine are sanitized for speech and
//! written into the session while a relay task forwards the session's audio
//! and word timings to the client, tagged with the cycle's response id.
//! When no session can be acquired within the retry budget the relay runs
//! text-only: guide text still reaches the client, audio does not.

use crate::client::ClientSink;
use crate::config::SynthesisConfig;
use crate::error::VoiceResult;
use crate::protocol::ResponseId;
use crate::tts::{SynthesisEvent, TtsConnector, TtsSession, TtsSink};
use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            // headings and list bullets
            (r"(?m)^[ \t]*#{1,6}[ \t]*", ""),
            (r"(?m)^[ \t]*[-*+][ \t]+", ""),
            // [label](url) -> label
            (r"\[([^\]]+)\]\([^)]*\)", "$1"),
            (r"\*{1,3}|_{2,3}|`+", ""),
            (r"…|\.{3,}", "..."),
            (r"[ \t]*[\r\n]+[ \t]*", " "),
            (r"[ \t]{2,}", " "),
        ]
        .into_iter()
        .filter_map(|(pattern, rep)| match Regex::new(pattern) {
            Ok(re) => Some((re, rep)),
            Err(e) => {
                warn!(target: "timewalk::tts", "bad sanitize pattern {}: {}", pattern, e);
                None
            }
        })
        .collect()
    })
}

/// Make a generated fragment suitable for speech: markup stripped, line
/// breaks folded into one flowing utterance, ellipses normalized.
///
/// Leading and trailing spaces are kept; fragments are concatenated by the
/// synthesizer and rely on them for word boundaries.
pub fn sanitize_for_speech(text: &str) -> String {
    rules()
        .iter()
        .fold(text.to_string(), |acc, (re, rep)| re.replace_all(&acc, *rep).into_owned())
}

/// Acquire a session, retrying with a fixed backoff. `None` means the budget
/// was exhausted (or the cycle was cancelled while waiting).
pub async fn acquire_session(
    connector: &dyn TtsConnector,
    config: &SynthesisConfig,
    cancel: &CancellationToken,
) -> Option<TtsSession> {
    let attempts = config.acquire_attempts.max(1);
    for attempt in 1..=attempts {
        match connector.open(&config.voice_id).await {
            Ok(session) => {
                if attempt > 1 {
                    info!(target: "timewalk::tts", attempt, "synthesis session acquired after retry");
                }
                return Some(session);
            }
            Err(e) => {
                warn!(target: "timewalk::tts", attempt, attempts, retryable = e.is_retryable(), "synthesis acquire failed: {}", e);
                if attempt == attempts || !e.is_retryable() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(config.acquire_backoff()) => {}
                }
            }
        }
    }
    warn!(target: "timewalk::tts", "⚠️ No synthesis session, continuing text-only");
    None
}

/// Relay for one response cycle.
pub struct SynthesisRelay {
    response_id: ResponseId,
    sink: Option<Box<dyn TtsSink>>,
    relay: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    drain_timeout: Duration,
    release_timeout: Duration,
}

impl SynthesisRelay {
    /// Acquire a session and start relaying its events. Never fails: on
    /// acquisition failure the relay is text-only.
    pub async fn start(
        connector: &dyn TtsConnector,
        config: &SynthesisConfig,
        response_id: ResponseId,
        client: ClientSink,
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let (sink, relay) = match acquire_session(connector, config, &cancel).await {
            Some(TtsSession { sink, events }) => {
                let handle = tokio::spawn(relay_events(
                    events,
                    client,
                    response_id.clone(),
                    cancel.clone(),
                ));
                (Some(sink), Some(handle))
            }
            None => (None, None),
        };
        Self {
            response_id,
            sink,
            relay,
            cancel,
            drain_timeout: config.drain_timeout(),
            release_timeout: config.release_timeout(),
        }
    }

    /// Sanitize and forward one text fragment. A write failure drops to
    /// text-only for the rest of the cycle.
    pub async fn push_text(&mut self, text: &str) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let spoken = sanitize_for_speech(text);
        if spoken.trim().is_empty() {
            return;
        }
        if let Err(e) = sink.send_text(&spoken).await {
            warn!(target: "timewalk::tts", response_id = %self.response_id, "synthesis write failed, going text-only: {}", e);
            if let Some(sink) = self.sink.take() {
                self.release(sink, false).await;
            }
        }
    }

    /// Normal completion: end input, wait (bounded) for buffered audio to be
    /// relayed, then release the session.
    pub async fn finish(mut self) {
        if let Some(sink) = self.sink.as_mut() {
            match tokio::time::timeout(self.release_timeout, sink.end_input()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(target: "timewalk::tts", "end_input: {}", e),
                Err(_) => {
                    warn!(target: "timewalk::tts", response_id = %self.response_id, "end_input timed out");
                    self.cancel.cancel();
                }
            }
        }
        if let Some(mut handle) = self.relay.take() {
            if tokio::time::timeout(self.drain_timeout, &mut handle).await.is_err() {
                warn!(target: "timewalk::tts", response_id = %self.response_id, "audio drain timed out");
                self.cancel.cancel();
                let _ = handle.await;
            }
        }
        if let Some(sink) = self.sink.take() {
            self.release(sink, false).await;
        }
        debug!(target: "timewalk::tts", response_id = %self.response_id, "synthesis finished");
    }

    /// Cancellation: stop relaying immediately, then release the session with
    /// a best-effort end of input.
    pub async fn abort(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.relay.take() {
            let _ = handle.await;
        }
        if let Some(sink) = self.sink.take() {
            self.release(sink, true).await;
        }
        debug!(target: "timewalk::tts", response_id = %self.response_id, "synthesis aborted");
    }

    /// Bounded release. A sink that does not answer in time is dropped.
    async fn release(&self, mut sink: Box<dyn TtsSink>, end_input: bool) {
        let limit = self.release_timeout;
        if end_input && tokio::time::timeout(limit, sink.end_input()).await.is_err() {
            warn!(target: "timewalk::tts", response_id = %self.response_id, "end_input timed out, dropping session");
            return;
        }
        if tokio::time::timeout(limit, sink.close()).await.is_err() {
            warn!(target: "timewalk::tts", response_id = %self.response_id, "close timed out, dropping session");
        }
    }
}

impl Drop for SynthesisRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn relay_events(
    mut events: BoxStream<'static, VoiceResult<SynthesisEvent>>,
    client: ClientSink,
    response_id: ResponseId,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ev = events.next() => ev,
        };
        let sent = match event {
            Some(Ok(SynthesisEvent::Audio(pcm))) => client.audio(&response_id, &pcm),
            Some(Ok(SynthesisEvent::Timestamp { text, start_s, stop_s })) => {
                client.word_timestamp(&response_id, text, start_s, stop_s)
            }
            Some(Ok(SynthesisEvent::End)) | None => break,
            Some(Err(e)) => {
                warn!(target: "timewalk::tts", response_id = %response_id, "synthesis stream error: {}", e);
                break;
            }
        };
        if sent.is_err() {
            break;
        }
    }
}
