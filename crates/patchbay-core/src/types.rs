//! Shared types for patchbay-core

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentProfile;

/// Who a message in the shared thread is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single committed entry of the shared conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Absent only for user-authored messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            author_id: None,
            author_handle: None,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn attributed to `author`
    pub fn reply(author: &AgentProfile, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            author_id: Some(author.id.clone()),
            author_handle: Some(author.handle.clone()),
            created_at: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_authored_by(&self, agent_id: &str) -> bool {
        self.author_id.as_deref() == Some(agent_id)
    }
}

/// How an agent is reached, which decides whether dispatch may target it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Direct vendor API call
    Api,
    /// API call relayed through an external bridge (e.g. a browser extension)
    RemoteBridge,
    /// A human copies context out and pastes replies back in
    Manual,
}

impl Capability {
    /// Whether the dispatch coordinator may invoke this agent on its own
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::RemoteBridge => write!(f, "remote_bridge"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Result of an adapter's side-effect-free readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ready,
    AuthMissing,
    Unreachable,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::AuthMissing => write!(f, "auth_missing"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}
