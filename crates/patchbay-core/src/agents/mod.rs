//! Agent identities and the registry that owns their adapters
//!
//! The registry knows every agent the process can talk to. Which of them are
//! currently in the room is the participant set's business.

pub mod profile;
pub mod registry;

pub use profile::{AgentProfile, handle_for};
pub use registry::{AgentRegistry, RegisteredAgent};
