//! Language-model clients.
//!
//! [`OllamaClient`] talks to an Ollama-compatible `/api/chat` endpoint over
//! blocking HTTP. [`FallbackChain`] puts a primary (network) service in front
//! of a local one and only falls back when the primary could not be reached.

use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::history::Role;
use super::tools::ToolCall;
use crate::error::{GenerationError, Result, VoxbotError};

type GenResult<T> = std::result::Result<T, GenerationError>;

const VISION_PROMPT: &str = "Describe what you see in this image in 2-3 sentences.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64-encoded images for vision models.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

/// What the model answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

pub trait LlmClient: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// One non-streaming chat completion. `tools` is a JSON array of tool
    /// schemas; `None` disables tool calling.
    fn chat(&self, messages: &[ChatMessage], tools: Option<&Value>) -> GenResult<LlmReply>;
}

/// Describes a captured image.
pub trait VisionModel: Send + Sync {
    fn describe(&self, image: &Path) -> GenResult<String>;
}

/// Ollama `/api/chat` client.
pub struct OllamaClient {
    name: String,
    base_url: String,
    model: String,
    http: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoxbotError::Other(anyhow::anyhow!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: model.into(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn post_chat(&self, body: &Value) -> GenResult<LlmReply> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(client = self.name.as_str(), model = self.model.as_str(), "chat request");

        let response = self.http.post(&url).json(body).send().map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Status(status.as_u16()));
        }
        let text = response.text().map_err(map_transport)?;
        parse_chat_response(&text)
    }
}

impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn chat(&self, messages: &[ChatMessage], tools: Option<&Value>) -> GenResult<LlmReply> {
        self.post_chat(&chat_request_body(&self.model, messages, tools))
    }
}

impl VisionModel for OllamaClient {
    fn describe(&self, image: &Path) -> GenResult<String> {
        let bytes = std::fs::read(image).map_err(|e| {
            GenerationError::Malformed(format!("cannot read image {}: {e}", image.display()))
        })?;
        let mut message = ChatMessage::new(Role::User, VISION_PROMPT);
        message.images.push(base64::engine::general_purpose::STANDARD.encode(bytes));

        match self.chat(&[message], None)? {
            LlmReply::Text(text) => Ok(text),
            LlmReply::ToolCalls(_) => Err(GenerationError::Malformed(
                "vision model answered with tool calls".into(),
            )),
        }
    }
}

fn map_transport(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout
    } else if e.is_connect() || e.is_request() {
        GenerationError::Connection(e.to_string())
    } else if e.is_decode() || e.is_body() {
        GenerationError::Malformed(e.to_string())
    } else {
        GenerationError::Connection(e.to_string())
    }
}

pub fn chat_request_body(model: &str, messages: &[ChatMessage], tools: Option<&Value>) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": false,
    });
    if let Some(tools) = tools {
        body["tools"] = tools.clone();
    }
    body
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    function: ToolCall,
}

/// Tool calls win over text; empty text is [`GenerationError::Empty`].
pub fn parse_chat_response(body: &str) -> GenResult<LlmReply> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;

    if !parsed.message.tool_calls.is_empty() {
        let calls = parsed
            .message
            .tool_calls
            .into_iter()
            .map(|c| normalise_arguments(c.function))
            .collect();
        return Ok(LlmReply::ToolCalls(calls));
    }

    let text = parsed.message.content.trim();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(LlmReply::Text(text.to_owned()))
}

/// Some servers send tool arguments as a JSON-encoded string.
fn normalise_arguments(mut call: ToolCall) -> ToolCall {
    if let Value::String(raw) = &call.arguments {
        if let Ok(decoded) = serde_json::from_str::<Value>(raw) {
            call.arguments = decoded;
        }
    }
    call
}

/// Primary service first, local service when the primary is unreachable.
pub struct FallbackChain {
    primary: Option<Box<dyn LlmClient>>,
    secondary: Box<dyn LlmClient>,
}

impl FallbackChain {
    pub fn new(primary: Option<Box<dyn LlmClient>>, secondary: Box<dyn LlmClient>) -> Self {
        Self { primary, secondary }
    }
}

impl LlmClient for FallbackChain {
    fn name(&self) -> &str {
        "fallback-chain"
    }

    fn chat(&self, messages: &[ChatMessage], tools: Option<&Value>) -> GenResult<LlmReply> {
        if let Some(primary) = self.primary.as_ref() {
            match primary.chat(messages, tools) {
                Err(e) if e.is_transport() => {
                    warn!(
                        primary = primary.name(),
                        secondary = self.secondary.name(),
                        error = %e,
                        "primary language model unreachable, falling back"
                    );
                }
                other => return other,
            }
        }
        self.secondary.chat(messages, tools)
    }
}
