//! patchbay-core - Multi-agent group chat engine
//!
//! This crate provides:
//! - Agent registry and the participant set of agents "in the room"
//! - `@mention` routing from raw user text to target agents
//! - An append-only shared history with agent-relative attributed views
//! - A dispatch coordinator that fans one message out to many agents at once
//! - Vendor adapters for OpenAI, Google Gemini and Anthropic, plus a manual relay
//! - Per-agent usage tracking

pub mod adapter;
pub mod agents;
pub mod attribution;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod mention;
pub mod participants;
pub mod providers;
pub mod types;
pub mod usage;

#[cfg(test)]
mod test_utils;

// Re-export main types for convenience
pub use adapter::AgentAdapter;
pub use agents::{AgentProfile, AgentRegistry, RegisteredAgent, handle_for};
pub use attribution::{ViewMessage, attribute};
pub use dispatch::{DispatchCoordinator, DispatchEvent, RoundOutcome, TargetOutcome};
pub use error::{AdapterError, DispatchError};
pub use history::{History, Snapshot};
pub use mention::{RoutedMessage, route};
pub use participants::{
    JsonParticipantStore, MemoryParticipantStore, ParticipantSet, ParticipantStore,
};
pub use providers::{AnthropicAdapter, ApiAgentConfig, GoogleAdapter, ManualRelay, OpenAiAdapter};
pub use types::{AgentStatus, Capability, Message, Role};
pub use usage::{UsageConfig, UsageObserver, UsageSample, UsageSummary, UsageTracker};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Just verify that all main types are exported
        let _ = std::mem::size_of::<AgentRegistry>();
        let _ = std::mem::size_of::<DispatchCoordinator>();
        let _ = std::mem::size_of::<History>();
        let _ = std::mem::size_of::<ParticipantSet>();
        let _ = std::mem::size_of::<RoutedMessage>();
        let _ = std::mem::size_of::<UsageTracker>();
    }
}
