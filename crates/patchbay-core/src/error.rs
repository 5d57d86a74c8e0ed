//! Error types for patchbay-core

use thiserror::Error;

/// Failure of a single agent invocation. Isolated to that agent's branch of
/// a dispatch round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// No credential configured for the agent
    #[error("missing API key for {0}")]
    AuthMissing(String),

    /// The request never produced an HTTP response
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the vendor
    #[error("{provider} API request failed with status {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// Response arrived but could not be understood
    #[error("malformed response: {0}")]
    Protocol(String),

    /// The adapter cannot serve prompts (e.g. manual relays)
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Contract violations between the router and the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A target id is not present in the agent registry
    #[error("unknown target agent: {0}")]
    UnknownTarget(String),
}
