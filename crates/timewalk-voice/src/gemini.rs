//! Gemini streaming backend for the dialogue engine.
//!
//! Uses `streamGenerateContent?alt=sse` and decodes `data:` lines into
//! [`ModelEvent`]s as they arrive.

use crate::dialogue::{FunctionCall, GenerationRequest, LanguageModel, ModelEvent, ModelStream};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Production model backend: Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiModel {
    pub fn new(api_key: impl Into<String>) -> VoiceResult<Self> {
        Self::with_base_url(GEMINI_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }
}

/// Request body for one round.
pub fn request_body(request: &GenerationRequest) -> Value {
    let mut body = json!({
        "contents": request.contents,
        "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
    });
    if !request.tools.is_empty() {
        body["tools"] = json!([{ "functionDeclarations": request.tools }]);
    }
    if let Some(names) = &request.forced_tools {
        body["toolConfig"] = json!({
            "functionCallingConfig": { "mode": "ANY", "allowedFunctionNames": names }
        });
    }
    if let Some(t) = request.temperature {
        body["generationConfig"] = json!({ "temperature": t });
    }
    body
}

/// Splits a byte stream into SSE `data:` payloads. Lines may be split across
/// chunks, including in the middle of a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Whatever is left when the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim();
    (!data.is_empty() && data != "[DONE]").then(|| data.to_string())
}

/// Events carried by one streamed response chunk.
pub fn parse_chunk(payload: &str) -> VoiceResult<Vec<ModelEvent>> {
    let v: Value = serde_json::from_str(payload)?;
    if let Some(err) = v.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(VoiceError::Generation(msg.to_string()));
    }
    let parts = v
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut events = Vec::new();
    for part in parts {
        if let Some(fc) = part.get("functionCall") {
            let name = fc.get("name").and_then(Value::as_str).unwrap_or_default();
            if name.is_empty() {
                continue;
            }
            let args = fc.get("args").cloned().unwrap_or_else(|| json!({}));
            events.push(ModelEvent::ToolCall(FunctionCall {
                name: name.to_string(),
                args,
            }));
        } else if part.get("thought").and_then(Value::as_bool) == Some(true) {
            continue;
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(ModelEvent::Text(text.to_string()));
            }
        }
    }
    Ok(events)
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn stream(&self, request: GenerationRequest) -> VoiceResult<ModelStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(&request))
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(target: "timewalk::dialogue", %status, "generation request rejected");
            return Err(VoiceError::Generation(format!("{}: {}", status, body)));
        }

        let mut bytes = res.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(VoiceError::from(e));
                        return;
                    }
                };
                for payload in decoder.push(&chunk) {
                    match parse_chunk(&payload) {
                        Ok(events) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            if let Some(payload) = decoder.finish() {
                match parse_chunk(&payload) {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(e) => yield Err(e),
                }
            }
            debug!(target: "timewalk::dialogue", "generation stream ended");
        };
        Ok(stream.boxed())
    }
}
