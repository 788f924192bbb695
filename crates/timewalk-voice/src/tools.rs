//! Tool-call executor: the guide's side effects.
//!
//! Tool names form a closed set ([`ToolKind`]); arguments are validated into
//! [`ToolCall`] by serde. Executing a call emits its client event and returns
//! the result record for history. Nothing here awaits the network on the
//! response path: world generation runs as a detached background job that
//! reports through `world_status` events and a [`SessionNotice`].

use crate::client::ClientSink;
use crate::dialogue::{FunctionCall, FunctionResponse};
use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{ServerMessage, WorldStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use timewalk_core::{select_track, CoreError, WorldAssets, WorldJobs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Every tool the guide knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    TriggerWorldGeneration,
    SelectMusic,
    GenerateFact,
    SuggestLocation,
    GenerateLoadingMessages,
    SummarizeSession,
    CompleteTransition,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::TriggerWorldGeneration,
        ToolKind::SelectMusic,
        ToolKind::GenerateFact,
        ToolKind::SuggestLocation,
        ToolKind::GenerateLoadingMessages,
        ToolKind::SummarizeSession,
        ToolKind::CompleteTransition,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::TriggerWorldGeneration => "trigger_world_generation",
            ToolKind::SelectMusic => "select_music",
            ToolKind::GenerateFact => "generate_fact",
            ToolKind::SuggestLocation => "suggest_location",
            ToolKind::GenerateLoadingMessages => "generate_loading_messages",
            ToolKind::SummarizeSession => "summarize_session",
            ToolKind::CompleteTransition => "complete_transition",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Function declaration in the provider's schema dialect.
    pub fn declaration(self) -> Value {
        let (description, properties, required): (&str, Value, Value) = match self {
            ToolKind::TriggerWorldGeneration => (
                "Start generating the 3D world once the user wants to explore a place and era.",
                json!({
                    "location": {"type": "STRING", "description": "The place to generate"},
                    "time_period": {"type": "STRING", "description": "The historical era"},
                    "scene_description": {"type": "STRING", "description": "Vivid visual description of the scene to generate"}
                }),
                json!(["location", "time_period", "scene_description"]),
            ),
            ToolKind::SelectMusic => (
                "Select background music that fits the era, region and mood.",
                json!({
                    "era": {"type": "STRING", "description": "Historical era"},
                    "region": {"type": "STRING", "description": "Geographic region"},
                    "mood": {"type": "STRING", "description": "Mood of the music",
                             "enum": ["contemplative", "majestic", "adventurous", "peaceful", "dramatic"]}
                }),
                json!(["era", "region", "mood"]),
            ),
            ToolKind::GenerateFact => (
                "Show a historical fact as an overlay card.",
                json!({
                    "fact_text": {"type": "STRING", "description": "A concise, interesting fact (1-2 sentences)"},
                    "category": {"type": "STRING", "description": "Category of the fact",
                                 "enum": ["culture", "technology", "politics", "daily_life", "art"]}
                }),
                json!(["fact_text", "category"]),
            ),
            ToolKind::SuggestLocation => (
                "Place a marker on the globe and fly the camera to a location.",
                json!({
                    "lat": {"type": "NUMBER", "description": "Latitude"},
                    "lng": {"type": "NUMBER", "description": "Longitude"},
                    "name": {"type": "STRING", "description": "Human-readable name, e.g. 'Rome, Italy'"}
                }),
                json!(["lat", "lng", "name"]),
            ),
            ToolKind::GenerateLoadingMessages => (
                "Show short atmospheric captions while the world loads.",
                json!({
                    "messages": {"type": "ARRAY", "items": {"type": "STRING"},
                                 "description": "Three to five short captions"}
                }),
                json!(["messages"]),
            ),
            ToolKind::SummarizeSession => (
                "Summarize the journey when the user is done exploring.",
                json!({
                    "summary": {"type": "STRING", "description": "Two or three sentence recap"},
                    "highlights": {"type": "ARRAY", "items": {"type": "STRING"},
                                   "description": "Memorable moments"}
                }),
                json!(["summary", "highlights"]),
            ),
            ToolKind::CompleteTransition => (
                "Move the user from the loading screen into the finished world.",
                json!({}),
                json!([]),
            ),
        };
        let mut declaration = json!({
            "name": self.name(),
            "description": description,
        });
        // Parameterless functions omit the schema entirely.
        if properties.as_object().is_some_and(|p| !p.is_empty()) {
            declaration["parameters"] = json!({
                "type": "OBJECT",
                "properties": properties,
                "required": required,
            });
        }
        declaration
    }
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    TriggerWorldGeneration {
        location: String,
        time_period: String,
        scene_description: String,
    },
    SelectMusic {
        era: String,
        region: String,
        mood: String,
    },
    GenerateFact {
        fact_text: String,
        category: String,
    },
    SuggestLocation {
        lat: f64,
        lng: f64,
        name: String,
    },
    GenerateLoadingMessages {
        messages: Vec<String>,
    },
    SummarizeSession {
        summary: String,
        #[serde(default)]
        highlights: Vec<String>,
    },
    CompleteTransition {},
}

impl ToolCall {
    /// Validate a raw call from the model.
    pub fn parse(call: &FunctionCall) -> VoiceResult<Self> {
        if ToolKind::from_name(&call.name).is_none() {
            return Err(VoiceError::UnknownTool(call.name.clone()));
        }
        let args = match &call.args {
            Value::Null => json!({}),
            other => other.clone(),
        };
        serde_json::from_value(json!({"name": call.name, "args": args})).map_err(|e| {
            VoiceError::ToolArguments {
                tool: call.name.clone(),
                message: e.to_string(),
            }
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::TriggerWorldGeneration { .. } => ToolKind::TriggerWorldGeneration,
            ToolCall::SelectMusic { .. } => ToolKind::SelectMusic,
            ToolCall::GenerateFact { .. } => ToolKind::GenerateFact,
            ToolCall::SuggestLocation { .. } => ToolKind::SuggestLocation,
            ToolCall::GenerateLoadingMessages { .. } => ToolKind::GenerateLoadingMessages,
            ToolCall::SummarizeSession { .. } => ToolKind::SummarizeSession,
            ToolCall::CompleteTransition {} => ToolKind::CompleteTransition,
        }
    }
}

/// Out-of-band notices from background jobs to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    WorldReady { world_id: String },
}

/// Polling schedule for world generation jobs.
#[derive(Debug, Clone, Copy)]
pub struct WorldTracking {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for WorldTracking {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

/// Executes tool calls for one connection.
#[derive(Clone)]
pub struct ToolExecutor {
    client: ClientSink,
    world_jobs: Option<Arc<dyn WorldJobs>>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    tracking: WorldTracking,
    /// Cancelled when the connection ends; stops background jobs.
    jobs_cancel: CancellationToken,
}

impl ToolExecutor {
    pub fn new(
        client: ClientSink,
        world_jobs: Option<Arc<dyn WorldJobs>>,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> Self {
        Self {
            client,
            world_jobs,
            notices,
            tracking: WorldTracking::default(),
            jobs_cancel: CancellationToken::new(),
        }
    }

    /// Tie background jobs to `cancel` instead of a private token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.jobs_cancel = cancel;
        self
    }

    pub fn with_tracking(mut self, tracking: WorldTracking) -> Self {
        self.tracking = tracking;
        self
    }

    /// Resolve one raw call: validate, execute, and pair it with its result.
    ///
    /// Unknown tools are logged and yield `None`; neither the call nor a
    /// result goes into history. Malformed arguments yield an error result so
    /// the call is still resolved.
    pub fn resolve(&self, call: FunctionCall) -> Option<(FunctionCall, FunctionResponse)> {
        let response = match ToolCall::parse(&call) {
            Ok(tool) => {
                info!(target: "timewalk::tools", "🔧 {}", call.name);
                self.execute(tool)
            }
            Err(VoiceError::UnknownTool(name)) => {
                warn!(target: "timewalk::tools", "unknown tool call {:?}, skipped", name);
                return None;
            }
            Err(e) => {
                warn!(target: "timewalk::tools", "{}", e);
                json!({"status": "error", "error": e.to_string()})
            }
        };
        let result = FunctionResponse {
            name: call.name.clone(),
            response,
        };
        Some((call, result))
    }

    /// Perform the side effect and return the result record.
    pub fn execute(&self, call: ToolCall) -> Value {
        match call {
            ToolCall::TriggerWorldGeneration {
                location,
                time_period,
                scene_description,
            } => {
                let Some(jobs) = self.world_jobs.clone() else {
                    let _ = self.client.send(ServerMessage::world_status(WorldStatus::Error));
                    return json!({"status": "error", "error": "world generation is not configured"});
                };
                let _ = self
                    .client
                    .send(ServerMessage::world_status(WorldStatus::Generating));
                let display_name = format!("{} - {}", location, time_period);
                tokio::spawn(track_world(
                    jobs,
                    self.client.clone(),
                    self.notices.clone(),
                    display_name,
                    scene_description,
                    self.tracking,
                    self.jobs_cancel.clone(),
                ));
                json!({"status": "generation_started"})
            }
            ToolCall::SelectMusic { era, region, mood } => match select_track(&era, &region, &mood) {
                Some(track) => {
                    let _ = self.client.send(ServerMessage::Music {
                        track_url: track.file.to_string(),
                        title: track.title.to_string(),
                    });
                    json!({"status": "playing", "track": track.title})
                }
                None => json!({"status": "no_track_found"}),
            },
            ToolCall::GenerateFact { fact_text, category } => {
                let _ = self.client.send(ServerMessage::Fact {
                    text: fact_text,
                    category,
                });
                json!({"status": "displayed"})
            }
            ToolCall::SuggestLocation { lat, lng, name } => {
                let _ = self
                    .client
                    .send(ServerMessage::SuggestedLocation { lat, lng, name });
                json!({"status": "location_suggested"})
            }
            ToolCall::GenerateLoadingMessages { messages } => {
                let _ = self.client.send(ServerMessage::LoadingMessages { messages });
                json!({"status": "displayed"})
            }
            ToolCall::SummarizeSession { summary, highlights } => {
                let _ = self
                    .client
                    .send(ServerMessage::SessionSummary { summary, highlights });
                json!({"status": "displayed"})
            }
            ToolCall::CompleteTransition {} => {
                let _ = self.client.send(ServerMessage::TransitionComplete);
                json!({"status": "transitioned"})
            }
        }
    }
}

/// Background job: start a world, poll until done, then report.
pub async fn track_world(
    jobs: Arc<dyn WorldJobs>,
    client: ClientSink,
    notices: mpsc::UnboundedSender<SessionNotice>,
    display_name: String,
    description: String,
    tracking: WorldTracking,
    cancel: CancellationToken,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(target: "timewalk::tools", "connection closed, world tracking stopped");
            return;
        }
        outcome = run_world_job(jobs.as_ref(), &display_name, &description, tracking) => outcome,
    };
    match outcome {
        Ok(assets) => {
            info!(target: "timewalk::tools", world_id = %assets.world_id, "🌍 World ready");
            let world_id = assets.world_id.clone();
            let _ = client.send(ServerMessage::WorldStatus {
                status: WorldStatus::Ready,
                world_id: Some(world_id.clone()),
                splat_url: assets.default_spz_url.clone(),
                assets: Some(assets),
            });
            let _ = notices.send(SessionNotice::WorldReady { world_id });
        }
        Err(e) => {
            error!(target: "timewalk::tools", "world generation failed: {}", e);
            let _ = client.send(ServerMessage::world_status(WorldStatus::Error));
        }
    }
}

async fn run_world_job(
    jobs: &dyn WorldJobs,
    display_name: &str,
    description: &str,
    tracking: WorldTracking,
) -> Result<WorldAssets, CoreError> {
    let operation_id = jobs.start(display_name, description).await?;
    info!(target: "timewalk::tools", %operation_id, "world generation started");
    for _ in 0..tracking.max_attempts {
        tokio::time::sleep(tracking.poll_interval).await;
        let status = jobs.poll(&operation_id).await?;
        if !status.done {
            continue;
        }
        if let Some(err) = status.error {
            return Err(CoreError::GenerationFailed(err));
        }
        let world_id = status.world_id.ok_or_else(|| {
            CoreError::UnexpectedResponse("finished operation without a world id".to_string())
        })?;
        return jobs.fetch_result(&world_id).await;
    }
    let waited = tracking.poll_interval.as_secs() * u64::from(tracking.max_attempts);
    Err(CoreError::Timeout(waited))
}
