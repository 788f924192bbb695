//! World Labs Marble client — 3D world generation jobs.
//!
//! A generation is a long-running operation: `start` returns an opaque
//! operation id, `poll` reports `done`/`error`, and once done the world
//! resource is fetched by its id. The voice core only sees the [`WorldJobs`]
//! trait so tests can substitute a scripted job runner.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const WORLD_LABS_BASE_URL: &str = "https://api.worldlabs.ai/marble/v1";
pub const DEFAULT_WORLD_MODEL: &str = "Marble 0.1-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Snapshot of one generation operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStatus {
    pub done: bool,
    pub error: Option<String>,
    /// World id once the operation is done.
    pub world_id: Option<String>,
    /// Raw `response` payload of a finished operation (may already carry assets).
    #[serde(skip)]
    pub response: Option<Value>,
}

impl OperationStatus {
    /// Parse a raw `operations/{id}` payload.
    pub fn from_payload(payload: &Value) -> Self {
        let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
        let error = payload.get("error").and_then(|e| match e {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| Some(other.to_string())),
        });
        let response = payload.get("response").cloned().filter(|r| !r.is_null());
        let world_id = if done {
            response.as_ref().and_then(extract_world_id)
        } else {
            None
        };
        Self {
            done,
            error,
            world_id,
            response,
        }
    }
}

/// Renderable assets of a finished world, normalized for the frontend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorldAssets {
    pub world_id: String,
    pub spz_urls: BTreeMap<String, String>,
    pub default_spz_url: Option<String>,
    pub collider_mesh_url: Option<String>,
    pub pano_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub caption: Option<String>,
}

impl WorldAssets {
    pub fn from_world(world_id: impl Into<String>, world: &Value) -> Self {
        let mut assets = extract_renderable_assets(world);
        assets.world_id = world_id.into();
        assets
    }
}

/// The three operations the voice core needs from the generation service.
#[async_trait]
pub trait WorldJobs: Send + Sync {
    /// Start a generation; returns the operation id.
    async fn start(&self, display_name: &str, description: &str) -> CoreResult<String>;

    /// Poll an operation once.
    async fn poll(&self, operation_id: &str) -> CoreResult<OperationStatus>;

    /// Fetch the finished world's assets.
    async fn fetch_result(&self, world_id: &str) -> CoreResult<WorldAssets>;
}

#[derive(Debug, Serialize)]
struct WorldPrompt<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text_prompt: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateWorldRequest<'a> {
    display_name: &'a str,
    world_prompt: WorldPrompt<'a>,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateWorldResponse {
    operation_id: String,
}

/// HTTP client for the World Labs Marble API.
#[derive(Debug, Clone)]
pub struct WorldLabsClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl WorldLabsClient {
    pub fn new(api_key: impl Into<String>) -> CoreResult<Self> {
        Self::with_base_url(WORLD_LABS_BASE_URL, api_key)
    }

    /// Create against a custom base URL (e.g. a local mock).
    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> CoreResult<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: DEFAULT_WORLD_MODEL.to_string(),
            client,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Start a generation with an explicit model name.
    pub async fn generate_world(
        &self,
        scene_description: &str,
        display_name: &str,
        model: &str,
    ) -> CoreResult<String> {
        let body = GenerateWorldRequest {
            display_name,
            world_prompt: WorldPrompt {
                kind: "text",
                text_prompt: scene_description,
            },
            model,
        };
        let res = self
            .client
            .post(format!("{}/worlds:generate", self.base_url))
            .header("WLT-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let res = check_status(res).await?;
        let parsed: GenerateWorldResponse = res.json().await?;
        tracing::info!(
            target: "timewalk::world",
            operation_id = %parsed.operation_id,
            "World generation started"
        );
        Ok(parsed.operation_id)
    }

    /// Fetch the raw operation payload once.
    pub async fn fetch_operation(&self, operation_id: &str) -> CoreResult<Value> {
        let res = self
            .client
            .get(format!("{}/operations/{}", self.base_url, operation_id))
            .header("WLT-Api-Key", &self.api_key)
            .send()
            .await?;
        Ok(check_status(res).await?.json().await?)
    }

    /// Fetch the raw world payload.
    pub async fn get_world(&self, world_id: &str) -> CoreResult<Value> {
        let res = self
            .client
            .get(format!("{}/worlds/{}", self.base_url, world_id))
            .header("WLT-Api-Key", &self.api_key)
            .send()
            .await?;
        Ok(check_status(res).await?.json().await?)
    }
}

async fn check_status(res: reqwest::Response) -> CoreResult<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(CoreError::Api { status, body })
}

#[async_trait]
impl WorldJobs for WorldLabsClient {
    async fn start(&self, display_name: &str, description: &str) -> CoreResult<String> {
        self.generate_world(description, display_name, &self.model).await
    }

    async fn poll(&self, operation_id: &str) -> CoreResult<OperationStatus> {
        let payload = self.fetch_operation(operation_id).await?;
        Ok(OperationStatus::from_payload(&payload))
    }

    async fn fetch_result(&self, world_id: &str) -> CoreResult<WorldAssets> {
        let world = self.get_world(world_id).await?;
        Ok(WorldAssets::from_world(world_id, &world))
    }
}

/// World id from either a world object or an operation payload.
pub fn extract_world_id(data: &Value) -> Option<String> {
    let direct = |v: &Value| {
        v.get("world_id")
            .or_else(|| v.get("id"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    direct(data).or_else(|| data.get("response").and_then(direct))
}

/// Normalize `assets.splats.spz_urls`, which is either a resolution map or a
/// plain list of URLs, into a resolution-keyed map.
pub fn extract_splat_urls(world: &Value) -> BTreeMap<String, String> {
    let raw = world.pointer("/assets/splats/spz_urls");
    let mut urls = BTreeMap::new();
    match raw {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                if let Some(url) = value.as_str().filter(|s| !s.is_empty()) {
                    urls.insert(key.clone(), url.to_string());
                }
            }
        }
        Some(Value::Array(list)) => {
            for url in list.iter().filter_map(Value::as_str).filter(|s| !s.is_empty()) {
                let key = if url.contains("100k") {
                    "100k".to_string()
                } else if url.contains("500k") {
                    "500k".to_string()
                } else if url.contains("full") {
                    "full_res".to_string()
                } else {
                    urls.len().to_string()
                };
                urls.insert(key, url.to_string());
            }
        }
        _ => {}
    }
    urls
}

/// Pick a splat URL for `resolution`, falling back through the known sizes.
pub fn preferred_splat_url(world: &Value, resolution: &str) -> Option<String> {
    let urls = extract_splat_urls(world);
    if urls.is_empty() {
        return None;
    }
    if let Some(url) = urls.get(resolution) {
        return Some(url.clone());
    }
    let alias = match resolution {
        "full" => Some("full_res"),
        "full_res" => Some("full"),
        _ => None,
    };
    if let Some(url) = alias.and_then(|a| urls.get(a)) {
        return Some(url.clone());
    }
    ["full_res", "500k", "100k", "full"]
        .iter()
        .find_map(|key| urls.get(*key).cloned())
        .or_else(|| urls.values().next().cloned())
}

/// Asset URLs the frontend can render locally.
pub fn extract_renderable_assets(world: &Value) -> WorldAssets {
    let spz_urls = extract_splat_urls(world);
    let default_spz_url = ["500k", "100k", "full_res"]
        .iter()
        .find_map(|key| spz_urls.get(*key).cloned())
        .or_else(|| spz_urls.values().next().cloned());
    let text = |pointer: &str| world.pointer(pointer).and_then(Value::as_str).map(String::from);
    WorldAssets {
        world_id: extract_world_id(world).unwrap_or_default(),
        default_spz_url,
        spz_urls,
        collider_mesh_url: text("/assets/mesh/collider_mesh_url"),
        pano_url: text("/assets/imagery/pano_url"),
        thumbnail_url: text("/assets/thumbnail_url"),
        caption: text("/assets/caption"),
    }
}
