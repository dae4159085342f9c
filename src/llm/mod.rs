//! Chat-completion gateway client.
//!
//! The classification/generation capability is consumed as an opaque
//! OpenAI-compatible endpoint: one request, one answer, no state. The
//! `ChatGateway` trait keeps the intent router testable without network.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

pub use crate::config::ChatGatewayConfig;
use crate::error::AgentError;

/// One stateless chat call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.3,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Stateless request/response chat capability.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Send one chat request and return the assistant's text answer.
    async fn chat(&self, request: ChatRequest) -> Result<String, AgentError>;
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// HTTP client for an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct HttpChatGateway {
    client: reqwest::Client,
    config: ChatGatewayConfig,
}

impl HttpChatGateway {
    pub fn new(config: ChatGatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ChatGateway for HttpChatGateway {
    async fn chat(&self, request: ChatRequest) -> Result<String, AgentError> {
        let body = WireRequest {
            model: &self.config.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Gateway {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Gateway {
                reason: format!("chat completion failed ({status}): {detail}"),
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| AgentError::Gateway {
                reason: e.to_string(),
            })?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::InvalidResponse {
                reason: "missing choices[0].message.content".to_string(),
            })
    }
}
