//! Google Gemini adapter

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

const PROVIDER: &str = "Gemini";

/// Reply used when Gemini answers with no candidates at all
pub const EMPTY_REPLY: &str = "No response from Gemini.";

/// Google Gemini adapter
pub struct GoogleAdapter {
    client: Client,
    config: ApiAgentConfig,
}

impl std::fmt::Debug for GoogleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAdapter")
            .field("id", &self.config.id)
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}

impl GoogleAdapter {
    pub fn new(config: ApiAgentConfig) -> Self {
        Self {
            client: http_client(),
            config,
        }
    }

    /// Convert an agent-relative view to Gemini wire format.
    /// Gemini wants alternating roles, so runs are merged first.
    fn to_gemini_contents(turns: Vec<ViewMessage>) -> Vec<GeminiContent> {
        merge_consecutive(turns)
            .into_iter()
            .map(|turn| GeminiContent {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_string(),
                parts: vec![GeminiPart { text: turn.content }],
            })
            .collect()
    }

    fn from_gemini_response(resp: GeminiApiResponse) -> String {
        let Some(candidate) = resp.candidates.into_iter().next() else {
            return EMPTY_REPLY.to_string();
        };
        let text: Vec<String> = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            text.join("")
        }
    }
}

#[async_trait]
impl AgentAdapter for GoogleAdapter {
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
        let url = self
            .config
            .endpoint(&format!("/v1beta/models/{}:generateContent", self.config.model));
        let contents = Self::to_gemini_contents(conversation(body, view));

        let request = serde_json::json!({
            "contents": contents,
            "systemInstruction": {
                "parts": [{"text": self.config.system_prompt()}]
            },
            "generationConfig": {
                "maxOutputTokens": self.config.max_tokens,
            },
        });

        debug!(
            "Gemini request: model={}, contents={}",
            self.config.model,
            contents.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(http_error(PROVIDER, response).await);
        }

        let api_response: GeminiApiResponse = response
            .json()
            .await
            .map_err(|e| protocol_error(PROVIDER, e))?;

        debug!(
            "Gemini response: candidates={}",
            api_response.candidates.len()
        );

        Ok(Self::from_gemini_response(api_response))
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}
