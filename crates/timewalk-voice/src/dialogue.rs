//! **Dialogue engine**: conversation history, phase configuration and
//! streaming generation.
//!
//! History is append-only and written in whole turns: a model turn is
//! committed together with the results of every tool call it made, after the
//! round's stream has been fully consumed. A round that is cancelled part way
//! leaves no trace of the model's partial output.

use crate::config::DialogueConfig;
use crate::context::GuideContext;
use crate::error::VoiceResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// One content part, in the provider's wire shape (`{"text": ...}`,
/// `{"functionCall": {...}}`, `{"functionResponse": {...}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// Non-speech triggers for a response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCue {
    /// A new session began; greet the user.
    SessionStart,
    /// The user confirmed the destination; start generating the world.
    ConfirmExploration,
    /// The world finished generating.
    WorldReady,
}

impl SystemCue {
    /// Stage direction recorded as the cue's user turn.
    pub fn stage_direction(self) -> &'static str {
        match self {
            SystemCue::SessionStart => {
                "[The user has just arrived at the globe. Welcome them warmly in two sentences and invite them to pick a place and a time.]"
            }
            SystemCue::ConfirmExploration => {
                "[The user confirmed they want to explore this place and era. Start the world generation now.]"
            }
            SystemCue::WorldReady => {
                "[The world is ready. Close the loading narration in one sentence and call complete_transition.]"
            }
        }
    }
}

/// What a generation round starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateInput {
    /// A finished user utterance.
    UserText(String),
    /// A system cue; recorded as a bracketed stage direction.
    Cue(SystemCue),
    /// Continue from history as it is (tool follow-up rounds).
    Continue,
}

/// One event of a generation round.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    ToolCall(FunctionCall),
}

pub type ModelStream = BoxStream<'static, VoiceResult<ModelEvent>>;

/// Everything the model needs for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub contents: Vec<Content>,
    /// Function declarations for the allowed tools
    pub tools: Vec<Value>,
    /// Names the model must choose from when a tool call is forced
    pub forced_tools: Option<Vec<String>>,
    pub temperature: Option<f32>,
}

/// A streaming language model with function calling.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream(&self, request: GenerationRequest) -> VoiceResult<ModelStream>;
}

const PERSONA: &str = "You are a warm, knowledgeable historical guide helping users explore any \
place and time period in human history. You speak conversationally, vivid but concise, and \
your words are spoken aloud: no lists, no markup, no emoji. Enthusiastic but not over-the-top, \
scholarly but accessible.";

/// Build the instruction text for the current context.
pub fn build_instructions(ctx: &GuideContext) -> String {
    format!(
        "{}\n\nCurrent context:\n{}\n\n{}",
        PERSONA,
        ctx.describe(),
        ctx.phase.behavior()
    )
}

pub struct DialogueEngine {
    model: Arc<dyn LanguageModel>,
    config: DialogueConfig,
    history: Vec<Content>,
}

impl DialogueEngine {
    pub fn new(model: Arc<dyn LanguageModel>, config: DialogueConfig) -> Self {
        Self {
            model,
            config,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    pub fn max_rounds(&self) -> u32 {
        self.config.max_tool_rounds.max(1)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Start one generation round.
    ///
    /// New user text or a cue is appended before the request is built;
    /// `Continue` generates from history as it stands. `round` is the
    /// zero-based round within the cycle; only round 0 can be forced to call
    /// a tool.
    pub async fn generate(
        &mut self,
        input: GenerateInput,
        ctx: &GuideContext,
        round: u32,
    ) -> VoiceResult<ModelStream> {
        match input {
            GenerateInput::UserText(text) => self.history.push(Content::user_text(text)),
            GenerateInput::Cue(cue) => self.history.push(Content::user_text(cue.stage_direction())),
            GenerateInput::Continue => {}
        }

        let allowed = ctx.phase.allowed_tools();
        let forced_tools = (round == 0 && ctx.phase.forces_tool_call())
            .then(|| allowed.iter().map(|t| t.name().to_string()).collect());

        let request = GenerationRequest {
            model: self.config.model.clone(),
            system_instruction: build_instructions(ctx),
            contents: self.history.clone(),
            tools: allowed.iter().map(|t| t.declaration()).collect(),
            forced_tools,
            temperature: self.config.temperature,
        };
        debug!(
            target: "timewalk::dialogue",
            phase = %ctx.phase,
            round,
            turns = request.contents.len(),
            forced = request.forced_tools.is_some(),
            "generation round"
        );
        self.model.stream(request).await
    }

    /// Record a finished round: the model turn (text plus calls) and then one
    /// user turn holding a result for every call. Empty rounds record nothing.
    pub fn commit_round(&mut self, text: String, resolved: Vec<(FunctionCall, FunctionResponse)>) {
        let mut parts = Vec::with_capacity(resolved.len() + 1);
        if !text.trim().is_empty() {
            parts.push(Part::Text(text));
        }
        let mut results = Vec::with_capacity(resolved.len());
        for (call, response) in resolved {
            parts.push(Part::FunctionCall(call));
            results.push(Part::FunctionResponse(response));
        }
        if parts.is_empty() {
            return;
        }
        self.history.push(Content {
            role: Role::Model,
            parts,
        });
        if !results.is_empty() {
            self.history.push(Content {
                role: Role::User,
                parts: results,
            });
        }
    }

    /// Calls in history without a matching result. Always zero between rounds.
    pub fn unresolved_calls(&self) -> usize {
        let calls = self
            .history
            .iter()
            .flat_map(|c| &c.parts)
            .filter(|p| matches!(p, Part::FunctionCall(_)))
            .count();
        let results = self
            .history
            .iter()
            .flat_map(|c| &c.parts)
            .filter(|p| matches!(p, Part::FunctionResponse(_)))
            .count();
        calls.saturating_sub(results)
    }
}
