//! Client channel message types.
//!
//! JSON text frames tagged by `type`. Kinds are snake_case (`guide_text`,
//! `world_status`); hyphenated aliases are accepted inbound. Every event that
//! belongs to one response cycle carries its `responseId` so the client can
//! drop late frames of a superseded cycle.

use crate::context::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use timewalk_core::WorldAssets;
use uuid::Uuid;

/// Tag of one response cycle. Fresh per cycle, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(String);

impl ResponseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ResponseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LocationUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TimePeriodUpdate {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

/// Messages received from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Base64 PCM chunk for the recognizer.
    Audio { data: String },
    Context {
        #[serde(default)]
        location: Option<LocationUpdate>,
        #[serde(default, rename = "timePeriod", alias = "time_period")]
        time_period: Option<TimePeriodUpdate>,
    },
    Phase { phase: Phase },
    Interrupt,
    #[serde(alias = "session-start")]
    SessionStart,
    #[serde(alias = "confirm-exploration")]
    ConfirmExploration,
}

impl ClientMessage {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldStatus {
    Generating,
    Ready,
    Error,
}

/// Messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Transcript {
        text: String,
        partial: bool,
    },
    ResponseStart {
        response_id: ResponseId,
    },
    GuideText {
        response_id: ResponseId,
        text: String,
    },
    /// Base64 PCM. Never sent without a response id.
    Audio {
        response_id: ResponseId,
        data: String,
    },
    WordTimestamp {
        response_id: ResponseId,
        text: String,
        start: f64,
        stop: f64,
    },
    /// The named response was cancelled by a newer turn.
    Interrupt {
        response_id: ResponseId,
    },
    WorldStatus {
        status: WorldStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        world_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        splat_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        assets: Option<WorldAssets>,
    },
    Music {
        track_url: String,
        title: String,
    },
    Fact {
        text: String,
        category: String,
    },
    SuggestedLocation {
        lat: f64,
        lng: f64,
        name: String,
    },
    LoadingMessages {
        messages: Vec<String>,
    },
    SessionSummary {
        summary: String,
        highlights: Vec<String>,
    },
    TransitionComplete,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn world_status(status: WorldStatus) -> Self {
        ServerMessage::WorldStatus {
            status,
            world_id: None,
            splat_url: None,
            assets: None,
        }
    }

    /// Response id this message belongs to, if it is part of a cycle.
    pub fn response_id(&self) -> Option<&ResponseId> {
        match self {
            ServerMessage::ResponseStart { response_id }
            | ServerMessage::GuideText { response_id, .. }
            | ServerMessage::Audio { response_id, .. }
            | ServerMessage::WordTimestamp { response_id, .. }
            | ServerMessage::Interrupt { response_id } => Some(response_id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Transcript { .. } => "transcript",
            ServerMessage::ResponseStart { .. } => "response_start",
            ServerMessage::GuideText { .. } => "guide_text",
            ServerMessage::Audio { .. } => "audio",
            ServerMessage::WordTimestamp { .. } => "word_timestamp",
            ServerMessage::Interrupt { .. } => "interrupt",
            ServerMessage::WorldStatus { .. } => "world_status",
            ServerMessage::Music { .. } => "music",
            ServerMessage::Fact { .. } => "fact",
            ServerMessage::SuggestedLocation { .. } => "suggested_location",
            ServerMessage::LoadingMessages { .. } => "loading_messages",
            ServerMessage::SessionSummary { .. } => "session_summary",
            ServerMessage::TransitionComplete => "transition_complete",
            ServerMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
