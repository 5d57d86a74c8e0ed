//! Agent registry: every known agent, active or not

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::profile::AgentProfile;
use crate::adapter::AgentAdapter;

/// A registered agent: its identity plus the adapter that reaches it
#[derive(Clone)]
pub struct RegisteredAgent {
    pub profile: AgentProfile,
    pub adapter: Arc<dyn AgentAdapter>,
}

impl std::fmt::Debug for RegisteredAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAgent")
            .field("profile", &self.profile)
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    agents: HashMap<String, RegisteredAgent>,
    order: Vec<String>,
}

/// Holds all known agents in registration order.
///
/// Agents can be added at any time (startup or on demand) and live for the
/// process lifetime; there is no removal.
#[derive(Default)]
pub struct AgentRegistry {
    inner: RwLock<Inner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id. Re-registering an id swaps the
    /// adapter but keeps its original position.
    pub fn register(&self, adapter: Arc<dyn AgentAdapter>) -> AgentProfile {
        let profile = AgentProfile::new(adapter.id(), adapter.display_name(), adapter.capability());
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if inner.agents.contains_key(&profile.id) {
            warn!("AgentRegistry: replacing adapter for '{}'", profile.id);
        } else {
            inner.order.push(profile.id.clone());
        }
        info!(
            "AgentRegistry: registered '{}' ({}, {})",
            profile.id, profile.handle, profile.capability
        );
        inner.agents.insert(
            profile.id.clone(),
            RegisteredAgent {
                profile: profile.clone(),
                adapter,
            },
        );
        profile
    }

    pub fn get(&self, id: &str) -> Option<RegisteredAgent> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let found = inner.agents.get(id).cloned();
        if found.is_none() {
            debug!("AgentRegistry: lookup miss for '{}'", id);
        }
        found
    }

    pub fn profile(&self, id: &str) -> Option<AgentProfile> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.agents.get(id).map(|a| a.profile.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.agents.contains_key(id)
    }

    /// All profiles in registration order
    pub fn list(&self) -> Vec<AgentProfile> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .map(|a| a.profile.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
