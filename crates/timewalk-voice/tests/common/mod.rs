//! In-process stand-ins for the recognizer, synthesizer and language model.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use timewalk_voice::{
    ClientSink, DialogueConfig, DialogueEngine, GenerationRequest, LanguageModel, ModelEvent,
    ModelStream, RecognizerEvent, ResponsePipeline, ServerMessage, SttConnector, SttSession,
    SttSink, SynthesisConfig, SynthesisEvent, ToolExecutor, TtsConnector, TtsSession, TtsSink,
    VoiceError, VoiceResult,
};
use tokio::sync::mpsc;

/// One scripted generation round.
pub struct Round {
    pub events: Vec<ModelEvent>,
    /// Keep the stream open after the scripted events.
    pub hang: bool,
}

impl Round {
    pub fn text(text: &str) -> Self {
        Self {
            events: vec![ModelEvent::Text(text.to_string())],
            hang: false,
        }
    }

    pub fn hanging(text: &str) -> Self {
        Self {
            events: vec![ModelEvent::Text(text.to_string())],
            hang: true,
        }
    }
}

/// Plays rounds in order and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    rounds: Mutex<VecDeque<Round>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn new(rounds: Vec<Round>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream(&self, request: GenerationRequest) -> VoiceResult<ModelStream> {
        self.requests.lock().unwrap().push(request);
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Round::text("Indeed."));
        let scripted = stream::iter(round.events.into_iter().map(Ok));
        if round.hang {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}

/// Synthesizer that echoes each text write back as one audio chunk.
#[derive(Default)]
pub struct EchoTts {
    failures_left: AtomicU32,
    pub opens: AtomicU32,
    pub spoken: Arc<Mutex<Vec<String>>>,
    /// `open<n>` / `close<n>` in the order they happened
    pub log: Arc<Mutex<Vec<String>>>,
    /// Sessions never answer end-of-input.
    stall_end_input: bool,
}

impl EchoTts {
    /// Fail the first `failures` acquisitions as if at capacity.
    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            ..Self::default()
        })
    }

    /// Sessions whose end-of-input hangs forever.
    pub fn stalling() -> Arc<Self> {
        Arc::new(Self {
            stall_end_input: true,
            ..Self::default()
        })
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

struct EchoSink {
    index: u32,
    events: fmpsc::UnboundedSender<VoiceResult<SynthesisEvent>>,
    spoken: Arc<Mutex<Vec<String>>>,
    log: Arc<Mutex<Vec<String>>>,
    stall_end_input: bool,
}

#[async_trait]
impl TtsSink for EchoSink {
    async fn send_text(&mut self, text: &str) -> VoiceResult<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        let _ = self
            .events
            .unbounded_send(Ok(SynthesisEvent::Audio(text.as_bytes().to_vec())));
        Ok(())
    }

    async fn end_input(&mut self) -> VoiceResult<()> {
        if self.stall_end_input {
            futures::future::pending::<()>().await;
        }
        let _ = self.events.unbounded_send(Ok(SynthesisEvent::End));
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().push(format!("close{}", self.index));
        self.events.close_channel();
    }
}

#[async_trait]
impl TtsConnector for EchoTts {
    async fn open(&self, _voice_id: &str) -> VoiceResult<TtsSession> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(VoiceError::SynthesisUnavailable("concurrency limit".into()));
        }
        let index = {
            let mut log = self.log.lock().unwrap();
            let index = log.iter().filter(|e| e.starts_with("open")).count() as u32;
            log.push(format!("open{}", index));
            index
        };
        let (tx, rx) = fmpsc::unbounded();
        Ok(TtsSession {
            sink: Box::new(EchoSink {
                index,
                events: tx,
                spoken: self.spoken.clone(),
                log: self.log.clone(),
                stall_end_input: self.stall_end_input,
            }),
            events: rx.boxed(),
        })
    }
}

type RecognizerFeed = fmpsc::UnboundedSender<VoiceResult<RecognizerEvent>>;

/// Recognizer fed by the test; each `open` hands out the next prepared session.
pub struct FakeStt {
    sessions: Mutex<VecDeque<fmpsc::UnboundedReceiver<VoiceResult<RecognizerEvent>>>>,
    opens: AtomicU32,
    pub audio: Arc<Mutex<Vec<u8>>>,
}

impl FakeStt {
    pub fn new() -> (Arc<Self>, RecognizerFeed) {
        let (stt, mut feeds) = Self::with_sessions(1);
        (stt, feeds.remove(0))
    }

    /// A recognizer that can be opened `count` times.
    pub fn with_sessions(count: usize) -> (Arc<Self>, Vec<RecognizerFeed>) {
        let (feeds, sessions): (Vec<_>, VecDeque<_>) =
            (0..count).map(|_| fmpsc::unbounded()).unzip();
        let stt = Arc::new(Self {
            sessions: Mutex::new(sessions),
            opens: AtomicU32::new(0),
            audio: Arc::new(Mutex::new(Vec::new())),
        });
        (stt, feeds)
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

struct AudioSink(Arc<Mutex<Vec<u8>>>);

#[async_trait]
impl SttSink for AudioSink {
    async fn send_audio(&mut self, pcm: &[u8]) -> VoiceResult<()> {
        self.0.lock().unwrap().extend_from_slice(pcm);
        Ok(())
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl SttConnector for FakeStt {
    async fn open(&self) -> VoiceResult<SttSession> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let events = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| VoiceError::Stt("recognizer unavailable".into()))?;
        Ok(SttSession {
            sink: Box::new(AudioSink(self.audio.clone())),
            events: events.boxed(),
        })
    }
}

pub fn fast_synthesis() -> SynthesisConfig {
    SynthesisConfig {
        acquire_attempts: 3,
        acquire_backoff_ms: 10,
        drain_timeout_ms: 1_000,
        release_timeout_ms: 100,
        ..SynthesisConfig::default()
    }
}

/// A pipeline over the fakes, plus the client-side receiver.
pub fn pipeline(
    model: Arc<ScriptedModel>,
    tts: Arc<EchoTts>,
) -> (
    ResponsePipeline,
    Arc<tokio::sync::Mutex<DialogueEngine>>,
    mpsc::UnboundedReceiver<ServerMessage>,
) {
    let (client, rx) = ClientSink::channel();
    let (notices, _) = mpsc::unbounded_channel();
    let engine = Arc::new(tokio::sync::Mutex::new(DialogueEngine::new(
        model,
        DialogueConfig::default(),
    )));
    let pipeline = ResponsePipeline {
        engine: engine.clone(),
        executor: ToolExecutor::new(client.clone(), None, notices),
        tts,
        synthesis: fast_synthesis(),
        client,
    };
    (pipeline, engine, rx)
}

/// Receive until `pred` matches, returning everything seen including the match.
pub async fn recv_until(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    pred: impl Fn(&ServerMessage) -> bool,
) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("client channel closed");
        let done = pred(&msg);
        seen.push(msg);
        if done {
            return seen;
        }
    }
}

/// Everything currently queued for the client.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        seen.push(msg);
    }
    seen
}
