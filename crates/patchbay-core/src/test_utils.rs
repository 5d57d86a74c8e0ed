//! Test doubles shared across module tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::adapter::AgentAdapter;
use crate::attribution::ViewMessage;
use crate::error::AdapterError;
use crate::types::{AgentStatus, Capability};

/// Adapter with a canned outcome. Records every view it is handed and can be
/// held back on a [`Notify`] gate to force completion order.
pub struct ScriptedAdapter {
    id: String,
    name: String,
    capability: Capability,
    outcome: Result<String, AdapterError>,
    gate: Option<Arc<Notify>>,
    views: Mutex<Vec<Vec<ViewMessage>>>,
    bodies: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn build(id: &str, name: &str, outcome: Result<String, AdapterError>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            capability: Capability::Api,
            outcome,
            gate: None,
            views: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(id: &str, name: &str, reply: &str) -> Self {
        Self::build(id, name, Ok(reply.to_string()))
    }

    pub fn failing(id: &str, name: &str, error: AdapterError) -> Self {
        Self::build(id, name, Err(error))
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn seen_views(&self) -> Vec<Vec<ViewMessage>> {
        self.views.lock().unwrap().clone()
    }

    pub fn seen_bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    async fn check_status(&self) -> AgentStatus {
        AgentStatus::Ready
    }

    async fn send_prompt(&self, body: &str, view: &[ViewMessage]) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.views.lock().unwrap().push(view.to_vec());
        self.bodies.lock().unwrap().push(body.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcome.clone()
    }
}
