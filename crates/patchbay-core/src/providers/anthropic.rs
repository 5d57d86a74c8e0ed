//! Anthropic Claude adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ApiAgentConfig, conversation, http_client, http_error, merge_consecutive, protocol_error,
    transport_error,
};
use crate::adapter::AgentAdapter;
use crate::attribution::ViewMessage;
use crate::error::AdapterError;
use crate::types::{AgentStatus, Capability, Role};

const PROVIDER: &str = "Anthropic";
const API_VERSION: &str = "2023-06-01";

/// Anthropic adapter
pub struct AnthropicAdapter {
    client: Client,
    config: ApiAgentConfig,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("id", &self.config.id)
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(config: ApiAgentConfig) -> Self {
        Self {
            client: http_client(),
            config,
        }
    }

    /// Messages must alternate and open with a user turn
    fn to_anthropic_messages(turns: Vec<ViewMessage>) -> Vec<AnthropicMessage> {
        let mut merged = merge_consecutive(turns);
        if merged.first().is_some_and(|t| t.role == Role::Assistant) {
            merged.insert(0, ViewMessage::user("(conversation start)"));
        }
        merged
            .into_iter()
            .map(|turn| AnthropicMessage {
                role: turn.role.to_string(),
                content: turn.content,
            })
            .collect()
    }

    fn from_anthropic_response(resp: AnthropicApiResponse) -> Result<String, AdapterError> {
        let text: Vec<String> = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicBlock::Text { text } => Some(text),
                AnthropicBlock::Other => None,
            })
            .collect();
        if text.is_empty() {
            return Err(AdapterError::Protocol(
                "Anthropic response had no text content".to_string(),
            ));
        }
        Ok(text.join("\n"))
    }
}

#[async_trait]
impl AgentAdapter for AnthropicAdapter {
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
        let url = self.config.endpoint("/v1/messages");
        let messages = Self::to_anthropic_messages(conversation(body, view));

        let request = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": self.config.system_prompt(),
            "messages": messages,
        });

        debug!(
            "Anthropic request: model={}, messages={}",
            self.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(http_error(PROVIDER, response).await);
        }

        let api_response: AnthropicApiResponse = response
            .json()
            .await
            .map_err(|e| protocol_error(PROVIDER, e))?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Self::from_anthropic_response(api_response)
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_anthropic_messages_merges_runs() {
        let msgs = AnthropicAdapter::to_anthropic_messages(vec![
            ViewMessage::user("hi"),
            ViewMessage::user("@Gemma327B wrote:\nhello"),
            ViewMessage::assistant("hey"),
        ]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[0].content, "hi\n\n@Gemma327B wrote:\nhello");
        assert_eq!(msgs[1].role, "assistant");
    }

    #[test]
    fn test_to_anthropic_messages_opens_with_user() {
        let msgs = AnthropicAdapter::to_anthropic_messages(vec![ViewMessage::assistant("pasted")]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "user");
    }

    #[test]
    fn test_from_anthropic_response_text() {
        let resp: AnthropicApiResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "Hello!"}, {"type": "thinking", "thinking": "..."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        }))
        .unwrap();
        assert_eq!(AnthropicAdapter::from_anthropic_response(resp).unwrap(), "Hello!");
    }

    #[test]
    fn test_from_anthropic_response_empty() {
        let resp: AnthropicApiResponse = serde_json::from_value(serde_json::json!({
            "content": [],
            "stop_reason": "max_tokens"
        }))
        .unwrap();
        assert!(matches!(
            AnthropicAdapter::from_anthropic_response(resp),
            Err(AdapterError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let adapter = AnthropicAdapter::new(ApiAgentConfig::new(
            "anthropic-claude",
            "Claude",
            "claude-sonnet-4-5",
            "",
            "https://api.anthropic.com",
        ));
        assert_eq!(adapter.check_status().await, AgentStatus::AuthMissing);
        assert!(matches!(
            adapter.send_prompt("hi", &[]).await,
            Err(AdapterError::AuthMissing(_))
        ));
    }

    #[test]
    fn test_anthropic_adapter_debug_hides_key() {
        let adapter = AnthropicAdapter::new(ApiAgentConfig::new(
            "anthropic-claude",
            "Claude",
            "claude-sonnet-4-5",
            "sk-ant-secret",
            "https://api.anthropic.com",
        ));
        let debug = format!("{:?}", adapter);
        assert!(!debug.contains("sk-ant-secret"));
    }
}
