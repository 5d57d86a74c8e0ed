//! OpenAI chat completions adapter (GPT-4o, o3, etc.)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiAgentConfig, conversation, http_client, http_error, protocol_error, transport_error};
use crate::adapter::AgentAdapter;
use crate::attribution::ViewMessage;
use crate::error::AdapterError;
use crate::types::{AgentStatus, Capability};

const PROVIDER: &str = "OpenAI";

/// OpenAI adapter
pub struct OpenAiAdapter {
    client: Client,
    config: ApiAgentConfig,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("id", &self.config.id)
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}

impl OpenAiAdapter {
    pub fn new(config: ApiAgentConfig) -> Self {
        Self {
            client: http_client(),
            config,
        }
    }

    /// Convert an agent-relative view to OpenAI wire format.
    /// Consecutive same-role turns are sent as they are.
    fn to_openai_messages(turns: &[ViewMessage], system: &str) -> Vec<OpenAiMessage> {
        let mut result = vec![OpenAiMessage {
            role: "system".to_string(),
            content: system.to_string(),
        }];
        result.extend(turns.iter().map(|turn| OpenAiMessage {
            role: turn.role.to_string(),
            content: turn.content.clone(),
        }));
        result
    }

    fn from_openai_response(resp: OpenAiApiResponse) -> Result<String, AdapterError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Protocol("OpenAI response had no choices".to_string()))?;

        choice
            .message
            .content
            .ok_or_else(|| AdapterError::Protocol("OpenAI response had no content".to_string()))
    }
}

#[async_trait]
impl AgentAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn display_name(&self) -> &str {
        &self.config.name
    }

    fn capability(&self) -> Capability {
        Capability::Api
    }

    async fn check_status(&self) -> AgentStatus {
        self.config.status()
    }

    async fn send_prompt(&self, body: &str, view: &[ViewMessage]) -> Result<String, AdapterError> {
        let api_key = self.config.require_key()?;
        let url = self.config.endpoint("/v1/chat/completions");
        let messages = Self::to_openai_messages(&conversation(body, view), &self.config.system_prompt());

        let request = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        });

        debug!(
            "OpenAI request: model={}, messages={}",
            self.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(http_error(PROVIDER, response).await);
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .map_err(|e| protocol_error(PROVIDER, e))?;

        debug!(
            "OpenAI response: choices={}, finish_reason={:?}",
            api_response.choices.len(),
            api_response.choices.first().map(|c| &c.finish_reason)
        );

        Self::from_openai_response(api_response)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}
