//! An agent's identity as seen by routing and attribution

use serde::{Deserialize, Serialize};

use crate::types::Capability;

/// Static identity of a registered agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    /// `@`-prefixed, whitespace-free form of `name`
    pub handle: String,
    pub capability: Capability,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capability: Capability) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            handle: handle_for(&name),
            name,
            capability,
        }
    }
}

/// Derive a handle from a display name: strip all whitespace and prefix `@`
pub fn handle_for(name: &str) -> String {
    let mut handle = String::with_capacity(name.len() + 1);
    handle.push('@');
    handle.extend(name.chars().filter(|c| !c.is_whitespace()));
    handle
}
