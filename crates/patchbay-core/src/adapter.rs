//! The seam between the core and every vendor/transport implementation

use async_trait::async_trait;

use crate::attribution::ViewMessage;
use crate::error::AdapterError;
use crate::types::{AgentStatus, Capability};

/// Trait that all agent adapters implement.
///
/// The core only ever talks to agents through this trait and never branches
/// on which vendor sits behind it. Identity fields are static for the
/// lifetime of the adapter.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Unique registry id (e.g. "openai-gpt-4o")
    fn id(&self) -> &str;

    /// Human-readable name, also the source of the agent's handle
    fn display_name(&self) -> &str;

    fn capability(&self) -> Capability;

    /// Readiness check. Must not have side effects.
    ///
    /// The bundled API adapters only check that a key is configured; they
    /// never probe the network, so they report `Ready` or `AuthMissing` and
    /// leave `Unreachable` to adapters that can tell.
    async fn check_status(&self) -> AgentStatus;

    /// Send `body` with the agent-relative `view` of the shared history.
    ///
    /// Fails only on transport, auth or protocol problems; anything the agent
    /// wants to say about the request belongs in the returned text.
    async fn send_prompt(&self, body: &str, view: &[ViewMessage]) -> Result<String, AdapterError>;
}
