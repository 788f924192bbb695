//! Voice core configuration.
//!
//! Every turn-detection threshold is tunable here; the defaults are empirical,
//! not derived. All structs deserialize with per-field defaults so a partial
//! TOML table or a single `TIMEWALK__VOICE__...` env var is enough to override
//! one value.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for turn detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Horizons (seconds) strictly below this are ignored (default: 2.0).
    /// Short horizons report high inactivity during ordinary pauses.
    pub min_horizon_s: f32,

    /// A turn becomes ready when the max qualifying probability exceeds this (default: 0.7)
    pub inactivity_threshold: f32,

    /// Silence after "ready" before the turn fires (default: 500ms)
    pub debounce_ms: u64,

    /// Debounce used shortly after an interrupt (default: 1200ms)
    pub post_interrupt_debounce_ms: u64,

    /// How long after an interrupt the longer debounce applies (default: 4s)
    pub post_interrupt_window_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            min_horizon_s: 2.0,
            inactivity_threshold: 0.7,
            debounce_ms: 500,
            post_interrupt_debounce_ms: 1200,
            post_interrupt_window_ms: 4000,
        }
    }
}

impl TurnConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn post_interrupt_debounce(&self) -> Duration {
        Duration::from_millis(self.post_interrupt_debounce_ms)
    }

    pub fn post_interrupt_window(&self) -> Duration {
        Duration::from_millis(self.post_interrupt_window_ms)
    }
}

/// Configuration for the speech synthesis relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Session acquisition attempts before degrading to text-only (default: 3)
    pub acquire_attempts: u32,

    /// Fixed wait between acquisition attempts (default: 500ms)
    pub acquire_backoff_ms: u64,

    /// Upper bound on waiting for buffered audio after end-of-input (default: 15s)
    pub drain_timeout_ms: u64,

    /// Limit on each end-of-input or close call while releasing a session (default: 2s)
    pub release_timeout_ms: u64,

    /// Voice used for every session
    pub voice_id: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: 3,
            acquire_backoff_ms: 500,
            drain_timeout_ms: 15_000,
            release_timeout_ms: 2_000,
            voice_id: crate::tts::DEFAULT_VOICE_ID.to_string(),
        }
    }
}

impl SynthesisConfig {
    pub fn acquire_backoff(&self) -> Duration {
        Duration::from_millis(self.acquire_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }
}

/// Configuration for the dialogue engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Model name (default: gemini-2.5-flash)
    pub model: String,

    /// Generation rounds per response cycle, tool follow-ups included (default: 3)
    pub max_tool_rounds: u32,

    /// Sampling temperature; provider default when unset
    pub temperature: Option<f32>,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            max_tool_rounds: 3,
            temperature: None,
        }
    }
}

/// All voice core settings for one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub turn: TurnConfig,
    pub synthesis: SynthesisConfig,
    pub dialogue: DialogueConfig,
}
