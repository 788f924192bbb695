//! # Timewalk Voice - Real-time Guide Orchestration
//!
//! This crate turns a stream of microphone audio into a spoken conversation
//! with the historical guide. It decides when the user has finished speaking,
//! runs one response cycle at a time (generation, tool calls, synthesis) and
//! cancels it cleanly when the user barges in.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          Voice Session                             │
//! │  ┌───────────────┐  ┌───────────────┐  ┌──────────────────────┐   │
//! │  │ Transcription │→ │ Turn Detector │→ │ Response Controller  │   │
//! │  │    (stt)      │  │  (debounce)   │  │ (one live response)  │   │
//! │  └───────────────┘  └───────────────┘  └──────────────────────┘   │
//! │          ↑                                  ↓            ↓         │
//! │     client audio                  ┌──────────────┐ ┌───────────┐  │
//! │                                   │   Dialogue   │ │ Synthesis │  │
//! │                                   │ + Tool Calls │ │   Relay   │  │
//! │                                   └──────────────┘ └───────────┘  │
//! │                                          ↓               ↓         │
//! │                               ┌─────────────────────────────────┐ │
//! │                               │   Client Sink (ordered events)  │ │
//! │                               └─────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod dialogue;
pub mod error;
pub mod gemini;
pub mod protocol;
pub mod response;
pub mod session;
pub mod stt;
pub mod synthesis;
pub mod tools;
pub mod tts;
pub mod turn;

pub use client::{drain_to, ClientSink};
pub use config::{DialogueConfig, SynthesisConfig, TurnConfig, VoiceConfig};
pub use context::{GuideContext, Phase};
pub use dialogue::{
    Content, DialogueEngine, FunctionCall, FunctionResponse, GenerateInput, GenerationRequest,
    LanguageModel, ModelEvent, ModelStream, Part, Role, SystemCue,
};
pub use error::{VoiceError, VoiceResult};
pub use gemini::GeminiModel;
pub use protocol::{ClientMessage, ResponseId, ServerMessage, WorldStatus};
pub use response::{ResponseController, ResponsePipeline, Trigger};
pub use session::{SessionServices, VoiceSession};
pub use stt::{GradiumStt, RecognizerEvent, SttConnector, SttSession, SttSink, TranscriptionRelay};
pub use synthesis::{sanitize_for_speech, SynthesisRelay};
pub use tools::{SessionNotice, ToolCall, ToolExecutor, ToolKind, WorldTracking};
pub use tts::{GradiumTts, SynthesisEvent, TtsConnector, TtsSession, TtsSink, DEFAULT_VOICE_ID};
pub use turn::{InactivityEstimate, TurnDetector};
