//! Vendor adapters
//!
//! One [`AgentAdapter`](crate::adapter::AgentAdapter) implementation per
//! vendor API plus the manual relay. Each adapter converts an agent-relative
//! view into its vendor's wire format; nothing above this module knows which
//! vendor it is talking to.

pub mod anthropic;
pub mod google;
pub mod manual;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use manual::ManualRelay;
pub use openai::OpenAiAdapter;

use std::time::Duration;

use reqwest::{Client, Response};

use crate::attribution::ViewMessage;
use crate::error::AdapterError;
use crate::types::AgentStatus;

/// Group-chat instructions sent as the system prompt. `{handle}` and
/// `{name}` are filled in per agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are {handle} ({name}). You are participating in a group chat with a user and other AI agents. When responding, speak directly to the group. Keep your responses concise.";

/// Settings shared by every API-backed adapter
#[derive(Clone)]
pub struct ApiAgentConfig {
    pub id: String,
    pub name: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Template with `{handle}` / `{name}` placeholders
    pub system_prompt: String,
}

impl std::fmt::Debug for ApiAgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiAgentConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ApiAgentConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            max_tokens: 4096,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// The system prompt with this agent's handle and name filled in
    pub fn system_prompt(&self) -> String {
        render_system_prompt(&self.system_prompt, &self.name)
    }

    /// "Ready" means a key is present, nothing more
    fn status(&self) -> AgentStatus {
        if self.api_key.trim().is_empty() {
            AgentStatus::AuthMissing
        } else {
            AgentStatus::Ready
        }
    }

    fn require_key(&self) -> Result<&str, AdapterError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(AdapterError::AuthMissing(self.name.clone()));
        }
        Ok(key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

pub fn render_system_prompt(template: &str, name: &str) -> String {
    template
        .replace("{handle}", &crate::agents::handle_for(name))
        .replace("{name}", name)
}

/// The turns to send: the view itself, or just the body if there is no view
pub(crate) fn conversation(body: &str, view: &[ViewMessage]) -> Vec<ViewMessage> {
    if view.is_empty() {
        vec![ViewMessage::user(body)]
    } else {
        view.to_vec()
    }
}

/// Collapse runs of same-role turns for vendors that require alternation
pub(crate) fn merge_consecutive(turns: Vec<ViewMessage>) -> Vec<ViewMessage> {
    let mut merged: Vec<ViewMessage> = Vec::with_capacity(turns.len());
    for turn in turns {
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
            }
            _ => merged.push(turn),
        }
    }
    merged
}

pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("Failed to build HTTP client")
}

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> AdapterError {
    AdapterError::Transport(format!("Failed to send request to {} API: {}", provider, err))
}

/// Turn a non-2xx response into an [`AdapterError::Http`]
pub(crate) async fn http_error(provider: &str, response: Response) -> AdapterError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    AdapterError::Http {
        provider: provider.to_string(),
        status,
        body,
    }
}

pub(crate) fn protocol_error(provider: &str, err: reqwest::Error) -> AdapterError {
    AdapterError::Protocol(format!("Failed to parse {} API response: {}", provider, err))
}
