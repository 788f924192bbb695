//! **Response lifecycle** — at most one live response per connection.
//!
//! A response cycle is one spawned task: generation rounds, tool execution
//! and speech synthesis under a single [`CancellationToken`]. Submitting a
//! new trigger cancels the current cycle and awaits its teardown (including
//! release of its synthesis session) before the next cycle starts, so two
//! cycles never write audio at the same time.

use crate::client::ClientSink;
use crate::config::SynthesisConfig;
use crate::context::GuideContext;
use crate::dialogue::{DialogueEngine, GenerateInput, ModelEvent, SystemCue};
use crate::error::VoiceResult;
use crate::protocol::ResponseId;
use crate::synthesis::SynthesisRelay;
use crate::tools::ToolExecutor;
use crate::tts::TtsConnector;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What starts (or stops) a response cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// A finished user utterance
    UserTurn(String),
    /// A system cue; no new user text
    System(SystemCue),
    /// Stop the current response and start nothing
    Interrupt,
}

impl Trigger {
    fn into_input(self) -> Option<GenerateInput> {
        match self {
            Trigger::UserTurn(text) => Some(GenerateInput::UserText(text)),
            Trigger::System(cue) => Some(GenerateInput::Cue(cue)),
            Trigger::Interrupt => None,
        }
    }
}

/// Everything a response cycle needs. Cloned into each cycle's task.
#[derive(Clone)]
pub struct ResponsePipeline {
    pub engine: Arc<Mutex<DialogueEngine>>,
    pub executor: ToolExecutor,
    pub tts: Arc<dyn TtsConnector>,
    pub synthesis: SynthesisConfig,
    pub client: ClientSink,
}

struct ResponseTask {
    id: ResponseId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ResponseController {
    pipeline: ResponsePipeline,
    current: Option<ResponseTask>,
}

impl ResponseController {
    pub fn new(pipeline: ResponsePipeline) -> Self {
        Self {
            pipeline,
            current: None,
        }
    }

    /// Id of the current cycle, whether or not it is still running.
    pub fn current_id(&self) -> Option<&ResponseId> {
        self.current.as_ref().map(|t| &t.id)
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    /// Cancel whatever is running, then start a cycle for `trigger` unless it
    /// is a bare interrupt. `context` is the snapshot the new cycle works from.
    /// A user turn that supersedes a running cycle emits `interrupt` for it.
    ///
    /// Returns the id of the new cycle.
    pub async fn submit(&mut self, trigger: Trigger, context: &GuideContext) -> Option<ResponseId> {
        let cancelled = self.cancel_current().await;

        let barge_in = matches!(trigger, Trigger::UserTurn(_));
        let input = trigger.into_input()?;
        if let (Some(old), true) = (&cancelled, barge_in) {
            let _ = self.pipeline.client.interrupt(old);
        }

        let id = ResponseId::new();
        let cancel = CancellationToken::new();
        let _ = self.pipeline.client.response_start(&id);
        info!(target: "timewalk::response", response_id = %id, phase = %context.phase, "▶️ Response started");

        let handle = tokio::spawn(run_response(
            self.pipeline.clone(),
            id.clone(),
            input,
            context.clone(),
            cancel.clone(),
        ));
        self.current = Some(ResponseTask {
            id: id.clone(),
            cancel,
            handle,
        });
        Some(id)
    }

    /// Cancel the current cycle and wait for its teardown.
    ///
    /// Returns the cancelled cycle's id if it was still running. Cancelling a
    /// finished cycle, or with none present, is a no-op.
    pub async fn cancel_current(&mut self) -> Option<ResponseId> {
        let task = self.current.take()?;
        let was_running = !task.handle.is_finished();
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            if e.is_panic() {
                warn!(target: "timewalk::response", response_id = %task.id, "response task panicked");
            }
        }
        if was_running {
            info!(target: "timewalk::response", response_id = %task.id, "⚡ Response cancelled");
            Some(task.id)
        } else {
            None
        }
    }

    /// Tear down on disconnect.
    pub async fn shutdown(&mut self) {
        self.cancel_current().await;
    }
}

impl Drop for ResponseController {
    fn drop(&mut self) {
        if let Some(task) = &self.current {
            task.cancel.cancel();
        }
    }
}

/// One response cycle. Synthesis cleanup runs on every exit path.
async fn run_response(
    pipeline: ResponsePipeline,
    id: ResponseId,
    input: GenerateInput,
    context: GuideContext,
    cancel: CancellationToken,
) {
    let mut relay = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        relay = SynthesisRelay::start(
            pipeline.tts.as_ref(),
            &pipeline.synthesis,
            id.clone(),
            pipeline.client.clone(),
            &cancel,
        ) => relay,
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        r = drive_rounds(&pipeline, &id, input, &context, &mut relay) => Some(r),
    };

    match result {
        Some(Ok(rounds)) => {
            relay.finish().await;
            info!(target: "timewalk::response", response_id = %id, rounds, "✅ Response complete");
        }
        Some(Err(e)) => {
            warn!(target: "timewalk::response", response_id = %id, "response abandoned: {}", e);
            relay.abort().await;
            let _ = pipeline.client.error(format!("The guide lost its train of thought: {}", e));
        }
        None => {
            relay.abort().await;
            debug!(target: "timewalk::response", response_id = %id, "response torn down");
        }
    }
}

/// Generation rounds until one makes no tool calls or the limit is reached.
/// Returns the number of rounds run.
async fn drive_rounds(
    pipeline: &ResponsePipeline,
    id: &ResponseId,
    input: GenerateInput,
    context: &GuideContext,
    relay: &mut SynthesisRelay,
) -> VoiceResult<u32> {
    if input == GenerateInput::Cue(SystemCue::SessionStart) {
        pipeline.engine.lock().await.clear();
    }

    let max_rounds = pipeline.engine.lock().await.max_rounds();
    let mut next = input;
    let mut rounds = 0;

    while rounds < max_rounds {
        let input = std::mem::replace(&mut next, GenerateInput::Continue);
        let mut stream = pipeline
            .engine
            .lock()
            .await
            .generate(input, context, rounds)
            .await?;
        rounds += 1;

        let mut text = String::new();
        let mut resolved = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::Text(fragment) => {
                    pipeline.client.guide_text(id, fragment.as_str())?;
                    relay.push_text(&fragment).await;
                    text.push_str(&fragment);
                }
                ModelEvent::ToolCall(call) => {
                    if let Some(pair) = pipeline.executor.resolve(call) {
                        resolved.push(pair);
                    }
                }
            }
        }

        let follow_up = !resolved.is_empty();
        pipeline.engine.lock().await.commit_round(text, resolved);
        if !follow_up {
            break;
        }
        debug!(target: "timewalk::response", response_id = %id, round = rounds, "tool results recorded, following up");
    }
    Ok(rounds)
}
