// Copyright 2025 XPU Bench Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request and response contracts for benchmark services.
//!
//! A [`RequestSpec`] describes one HTTP call; dispatching it yields a
//! [`RequestResult`]. The dispatcher treats bodies as opaque bytes. Shape
//! validation of OpenAI-compatible responses lives in [`ResponseShape`] and
//! is applied by the benchmark layer, so one dispatcher serves health,
//! model-listing, chat and completion calls alike.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat completion endpoint.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Plain completion endpoint.
pub const COMPLETIONS_PATH: &str = "/v1/completions";

/// Model listing endpoint.
pub const MODELS_PATH: &str = "/v1/models";

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Expected response body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// Any body is acceptable.
    Opaque,
    /// `{"status": "<string>", ...}`
    Health,
    /// `{"data": [...], ...}`
    Models,
    /// `{"choices": [{"message": {"content": "<string>"}}]}`
    ChatCompletion,
    /// `{"choices": [{"text": "<string>"}]}`
    Completion,
}

/// Content extracted from a validated response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Generated text, health status, or model list, depending on shape.
    pub text: Option<String>,
    /// `usage.completion_tokens`, when the server reports it.
    pub completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ModelsBody {
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageBody {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl ResponseShape {
    /// Validate `body` against this shape and extract its content.
    pub fn parse(&self, body: &[u8]) -> Result<ParsedResponse, RequestError> {
        match self {
            Self::Opaque => Ok(ParsedResponse {
                text: Some(String::from_utf8_lossy(body).into_owned()),
                completion_tokens: None,
            }),
            Self::Health => {
                let health: HealthBody = decode(body, "health")?;
                Ok(ParsedResponse {
                    text: Some(health.status),
                    completion_tokens: None,
                })
            }
            Self::Models => {
                let models: ModelsBody = decode(body, "models")?;
                let ids: Vec<String> = models
                    .data
                    .iter()
                    .map(|m| match m.get("id").and_then(|id| id.as_str()) {
                        Some(id) => id.to_string(),
                        None => m.to_string(),
                    })
                    .collect();
                Ok(ParsedResponse {
                    text: Some(ids.join(", ")),
                    completion_tokens: None,
                })
            }
            Self::ChatCompletion => {
                let chat: ChatBody = decode(body, "chat completion")?;
                let choice = chat
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| RequestError::protocol("chat completion has no choices"))?;
                Ok(ParsedResponse {
                    text: Some(choice.message.content),
                    completion_tokens: chat.usage.and_then(|u| u.completion_tokens),
                })
            }
            Self::Completion => {
                let completion: CompletionBody = decode(body, "completion")?;
                let choice = completion
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| RequestError::protocol("completion has no choices"))?;
                Ok(ParsedResponse {
                    text: Some(choice.text),
                    completion_tokens: completion.usage.and_then(|u| u.completion_tokens),
                })
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8], what: &str) -> Result<T, RequestError> {
    serde_json::from_slice(body)
        .map_err(|e| RequestError::protocol(format!("unexpected {} response: {}", what, e)))
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role, `user` for benchmark prompts.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// OpenAI-compatible chat completion request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Served model name.
    pub model: String,
    /// Conversation.
    pub messages: Vec<ChatMessage>,
    /// Generation limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// OpenAI-compatible completion request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Served model name.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Generation limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Generation endpoint used by a benchmark run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// `/v1/chat/completions`
    #[default]
    Chat,
    /// `/v1/completions`
    Completion,
}

impl RequestKind {
    /// Build a generation request of this kind.
    pub fn request(&self, model: &str, prompt: &str, max_tokens: u32, temperature: f64) -> RequestSpec {
        match self {
            Self::Chat => RequestSpec::chat(model, prompt, max_tokens, temperature),
            Self::Completion => RequestSpec::completion(model, prompt, max_tokens, temperature),
        }
    }
}

impl FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "completion" | "completions" => Ok(Self::Completion),
            other => Err(format!("unknown request kind '{}': expected chat or completion", other)),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => f.write_str("chat"),
            Self::Completion => f.write_str("completion"),
        }
    }
}

/// Description of one HTTP call against the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the service base URL.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
    /// Overall request timeout.
    pub timeout: Duration,
    /// Shape the response is validated against.
    pub shape: ResponseShape,
}

impl RequestSpec {
    /// A GET request with an opaque response.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            shape: ResponseShape::Opaque,
        }
    }

    /// A POST request with a JSON body and an opaque response.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            shape: ResponseShape::Opaque,
        }
    }

    /// Health check against `path`.
    pub fn health(path: impl Into<String>) -> Self {
        Self::get(path).expecting(ResponseShape::Health)
    }

    /// Model listing.
    pub fn models() -> Self {
        Self::get(MODELS_PATH).expecting(ResponseShape::Models)
    }

    /// Single-turn chat completion.
    pub fn chat(model: &str, prompt: &str, max_tokens: u32, temperature: f64) -> Self {
        let body = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature,
        };
        Self::post(CHAT_COMPLETIONS_PATH, to_json(&body)).expecting(ResponseShape::ChatCompletion)
    }

    /// Plain completion.
    pub fn completion(model: &str, prompt: &str, max_tokens: u32, temperature: f64) -> Self {
        let body = CompletionRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            max_tokens,
            temperature,
        };
        Self::post(COMPLETIONS_PATH, to_json(&body)).expecting(ResponseShape::Completion)
    }

    /// Override the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the expected response shape.
    pub fn expecting(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }
}

// Request bodies are plain structs of strings and numbers.
fn to_json<T: Serialize>(body: &T) -> serde_json::Value {
    serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
}

/// Why a request did not produce a usable response.
///
/// Recorded alongside the result; never propagated as a failure of the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestError {
    /// Connection, DNS or timeout failure; no HTTP response was received.
    #[error("Network error: {message}")]
    Network {
        /// Underlying client message.
        message: String,
        /// The request exceeded its timeout.
        timed_out: bool,
    },

    /// A response arrived but did not have the expected shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// What was wrong with the body.
        message: String,
    },
}

impl RequestError {
    /// Network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Request timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            timed_out: true,
        }
    }

    /// Unexpected response shape.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether this is a network-level failure.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Normalized outcome of dispatching one [`RequestSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    /// HTTP status, or 0 when no response was received.
    pub status_code: u16,
    /// Time spent on the request.
    pub latency: Duration,
    /// Raw response body.
    pub body: Bytes,
    /// Failure classification, if any.
    pub error: Option<RequestError>,
}

impl RequestResult {
    /// A received HTTP response, whatever its status.
    pub fn response(status_code: u16, body: impl Into<Bytes>, latency: Duration) -> Self {
        Self {
            status_code,
            latency,
            body: body.into(),
            error: None,
        }
    }

    /// A request that never produced a response.
    pub fn failed(error: RequestError, latency: Duration) -> Self {
        Self {
            status_code: 0,
            latency,
            body: Bytes::new(),
            error: Some(error),
        }
    }

    /// `200` and no recorded error.
    pub fn is_success(&self) -> bool {
        self.status_code == 200 && self.error.is_none()
    }

    /// Body decoded as UTF-8, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// One-line description for logs and reports.
    pub fn describe(&self) -> String {
        match &self.error {
            Some(err) if self.status_code == 0 => err.to_string(),
            Some(err) => format!("HTTP {}: {}", self.status_code, err),
            None => format!("HTTP {}", self.status_code),
        }
    }
}
