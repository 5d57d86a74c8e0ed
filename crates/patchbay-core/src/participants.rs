//! Participant set: which registered agents are currently in the room

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::agents::{AgentProfile, AgentRegistry};

/// Persistence collaborator for participant membership
pub trait ParticipantStore: Send + Sync {
    fn save(&self, ids: &[String]) -> Result<()>;
    fn load(&self) -> Result<Vec<String>>;
}

/// In-process store, mostly for tests and one-shot commands
#[derive(Debug, Default)]
pub struct MemoryParticipantStore {
    ids: Mutex<Vec<String>>,
    saves: Mutex<usize>,
}

impl MemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: Vec<String>) -> Self {
        Self {
            ids: Mutex::new(ids),
            saves: Mutex::new(0),
        }
    }

    /// How many times membership has been saved
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ParticipantStore for MemoryParticipantStore {
    fn save(&self, ids: &[String]) -> Result<()> {
        *self.ids.lock().unwrap_or_else(PoisonError::into_inner) = ids.to_vec();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn load(&self) -> Result<Vec<String>> {
        Ok(self.ids.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// Membership stored as a JSON array of agent ids
#[derive(Debug, Clone)]
pub struct JsonParticipantStore {
    path: PathBuf,
}

impl JsonParticipantStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParticipantStore for JsonParticipantStore {
    fn save(&self, ids: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(ids)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        debug!("Saved {} participant(s) to {}", ids.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let ids: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(ids)
    }
}

/// Ordered set of agent ids eligible for mention routing and `@all`.
///
/// Never holds an id the registry does not know. Every change is handed to
/// the store; a store failure is logged and membership stays changed.
pub struct ParticipantSet {
    registry: Arc<AgentRegistry>,
    ids: RwLock<Vec<String>>,
    store: Arc<dyn ParticipantStore>,
}

impl ParticipantSet {
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<dyn ParticipantStore>) -> Self {
        Self {
            registry,
            ids: RwLock::new(Vec::new()),
            store,
        }
    }

    /// Add an agent. Returns false if it is already present or unregistered.
    pub fn join(&self, id: &str) -> bool {
        if !self.registry.contains(id) {
            warn!("Cannot join unregistered agent '{}'", id);
            return false;
        }
        let snapshot = {
            let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
            if ids.iter().any(|existing| existing == id) {
                return false;
            }
            ids.push(id.to_string());
            ids.clone()
        };
        info!("Participant joined: {}", id);
        self.persist(&snapshot);
        true
    }

    /// Remove an agent. Returns false if it was not present.
    pub fn leave(&self, id: &str) -> bool {
        let snapshot = {
            let mut ids = self.ids.write().unwrap_or_else(PoisonError::into_inner);
            let before = ids.len();
            ids.retain(|existing| existing != id);
            if ids.len() == before {
                return false;
            }
            ids.clone()
        };
        info!("Participant left: {}", id);
        self.persist(&snapshot);
        true
    }

    /// Replace membership wholesale, dropping unknown ids and duplicates
    pub fn replace_all(&self, ids: &[String]) {
        let cleaned = self.clean(ids);
        let changed = {
            let mut current = self.ids.write().unwrap_or_else(PoisonError::into_inner);
            if *current == cleaned {
                false
            } else {
                *current = cleaned.clone();
                true
            }
        };
        if changed {
            info!("Participants replaced: {:?}", cleaned);
            self.persist(&cleaned);
        }
    }

    /// Load persisted membership. Returns how many participants were restored.
    pub fn restore(&self) -> usize {
        let loaded = match self.store.load() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to load participants: {:#}", e);
                return 0;
            }
        };
        let cleaned = self.clean(&loaded);
        if cleaned.len() != loaded.len() {
            debug!(
                "Dropped {} stale participant id(s) on restore",
                loaded.len() - cleaned.len()
            );
        }
        let count = cleaned.len();
        *self.ids.write().unwrap_or_else(PoisonError::into_inner) = cleaned;
        count
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Profiles of current participants, in participant order
    pub fn profiles(&self) -> Vec<AgentProfile> {
        self.ids()
            .iter()
            .filter_map(|id| self.registry.profile(id))
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|existing| existing == id)
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clean(&self, ids: &[String]) -> Vec<String> {
        let mut cleaned: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if self.registry.contains(id) && !cleaned.contains(id) {
                cleaned.push(id.clone());
            }
        }
        cleaned
    }

    fn persist(&self, ids: &[String]) {
        if let Err(e) = self.store.save(ids) {
            warn!("Failed to save participants: {:#}", e);
        }
    }
}
