//! Wires config into a running chat session

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use patchbay_core::{
    AgentAdapter, AgentRegistry, AnthropicAdapter, ApiAgentConfig, DispatchCoordinator,
    DispatchEvent, GoogleAdapter, History, JsonParticipantStore, ManualRelay, OpenAiAdapter,
    ParticipantSet, UsageConfig, UsageTracker,
};

use crate::config::{AgentEntry, AgentKind, PatchbayConfig};

pub struct Session {
    pub registry: Arc<AgentRegistry>,
    pub participants: ParticipantSet,
    pub coordinator: DispatchCoordinator,
    pub relays: HashMap<String, Arc<ManualRelay>>,
    pub usage: Arc<UsageTracker>,
}

impl Session {
    pub fn build(cfg: &PatchbayConfig, events: mpsc::UnboundedSender<DispatchEvent>) -> Result<Self> {
        let state_dir = shellexpand(&cfg.session.state_dir);
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("Failed to create state dir: {}", state_dir.display()))?;

        let registry = Arc::new(AgentRegistry::new());
        let mut relays = HashMap::new();
        for entry in &cfg.agents {
            if entry.kind == AgentKind::Manual {
                let relay = Arc::new(ManualRelay::new(&entry.id, &entry.name));
                registry.register(relay.clone());
                relays.insert(entry.id.clone(), relay);
            } else {
                registry.register(build_adapter(cfg, entry)?);
            }
        }
        info!("Registered {} agent(s)", registry.len());

        let store = Arc::new(JsonParticipantStore::new(state_dir.join("participants.json")));
        let participants = ParticipantSet::new(registry.clone(), store);
        if participants.restore() == 0 {
            seed_participants(&registry, &participants);
        }

        let usage = Arc::new(UsageTracker::with_file(
            UsageConfig {
                enabled: cfg.usage.enabled,
            },
            state_dir.join("usage.json"),
        ));

        let coordinator = DispatchCoordinator::new(registry.clone(), History::new())
            .with_events(events)
            .with_usage_observer(usage.clone());

        Ok(Self {
            registry,
            participants,
            coordinator,
            relays,
            usage,
        })
    }

    /// Clear the conversation and everything that tracks a position in it
    pub fn clear(&self) {
        self.coordinator.history().clear();
        for relay in self.relays.values() {
            relay.reset();
        }
    }
}

/// The first non-manual agent joins when nothing was persisted
fn seed_participants(registry: &AgentRegistry, participants: &ParticipantSet) {
    if let Some(first) = registry
        .list()
        .into_iter()
        .find(|p| p.capability.is_dispatchable())
    {
        debug!("No saved participants, starting with {}", first.id);
        participants.join(&first.id);
    }
}

fn build_adapter(cfg: &PatchbayConfig, entry: &AgentEntry) -> Result<Arc<dyn AgentAdapter>> {
    let adapter: Arc<dyn AgentAdapter> = match entry.kind {
        AgentKind::OpenAi => Arc::new(OpenAiAdapter::new(api_config(cfg, entry)?)),
        AgentKind::Google => Arc::new(GoogleAdapter::new(api_config(cfg, entry)?)),
        AgentKind::Anthropic => Arc::new(AnthropicAdapter::new(api_config(cfg, entry)?)),
        AgentKind::Manual => bail!("Agent '{}' is manual and has no API adapter", entry.id),
    };
    Ok(adapter)
}

fn api_config(cfg: &PatchbayConfig, entry: &AgentEntry) -> Result<ApiAgentConfig> {
    let provider = cfg
        .provider(entry.kind)
        .with_context(|| format!("No [providers.{}] section for agent '{}'", entry.kind, entry.id))?;
    let model = entry
        .model
        .clone()
        .with_context(|| format!("Agent '{}' needs a model", entry.id))?;
    let base_url = provider
        .base_url
        .clone()
        .unwrap_or_else(|| entry.kind.default_base_url().to_string());

    Ok(
        ApiAgentConfig::new(&entry.id, &entry.name, model, &provider.api_key, base_url)
            .with_max_tokens(provider.max_tokens)
            .with_system_prompt(&cfg.session.system_prompt),
    )
}

// Utility: expand ~ and allowlisted env vars in paths
pub fn shellexpand(s: &str) -> PathBuf {
    PathBuf::from(shellexpand_str(s))
}

fn shellexpand_str(s: &str) -> String {
    let mut result = crate::config::expand_env_vars(s);
    if result.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            result = format!("{}{}", home.display(), &result[1..]);
        }
    }
    result
}
