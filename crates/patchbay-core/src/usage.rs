//! Per-agent usage tracking
//!
//! Counts successful replies and their latency per agent, keeps a
//! session-wide request total, and optionally mirrors the counters to a JSON
//! file so they survive restarts. Fed by the dispatch coordinator through the
//! [`UsageObserver`] trait.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One successful reply, as reported by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub agent_id: String,
    pub latency_ms: u64,
}

/// Receives a sample after every committed reply. Awaited on the dispatch
/// path, so implementations must not do blocking I/O.
#[async_trait]
pub trait UsageObserver: Send + Sync {
    async fn record(&self, sample: &UsageSample);
}

/// Configuration for usage tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    pub enabled: bool,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Accumulated counters for one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub requests: u64,
    pub total_latency_ms: u64,
}

impl AgentUsage {
    pub fn average_latency_ms(&self) -> u64 {
        if self.requests == 0 {
            0
        } else {
            self.total_latency_ms / self.requests
        }
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub by_agent: BTreeMap<String, AgentUsage>,
}

/// The usage tracker, an in-memory [`UsageSummary`] with optional JSON backing
pub struct UsageTracker {
    config: UsageConfig,
    path: Option<PathBuf>,
    state: Mutex<UsageSummary>,
    /// Serializes saves so the newest counters are written last
    save_lock: tokio::sync::Mutex<()>,
}

impl UsageTracker {
    pub fn new(config: UsageConfig) -> Self {
        Self {
            config,
            path: None,
            state: Mutex::new(UsageSummary::default()),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Tracker backed by `path`. Existing counters are loaded; an unreadable
    /// file is logged and replaced on the next save.
    pub fn with_file(config: UsageConfig, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match load_summary(&path) {
            Ok(Some(summary)) => {
                info!(
                    "Usage tracker loaded {} request(s) from {}",
                    summary.total_requests,
                    path.display()
                );
                summary
            }
            Ok(None) => UsageSummary::default(),
            Err(e) => {
                warn!("Ignoring unreadable usage file: {:#}", e);
                UsageSummary::default()
            }
        };
        Self {
            config,
            path: Some(path),
            state: Mutex::new(state),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> UsageSummary {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn clear(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = UsageSummary::default();
        info!("Usage counters cleared");
        self.persist().await;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn persist(&self) {
        let Some(path) = &self.path else { return };
        let _guard = self.save_lock.lock().await;
        let summary = self.snapshot();
        if let Err(e) = save_summary(path, &summary).await {
            warn!("Failed to save usage counters: {:#}", e);
        }
    }
}

#[async_trait]
impl UsageObserver for UsageTracker {
    async fn record(&self, sample: &UsageSample) {
        if !self.config.enabled {
            return;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.total_requests += 1;
            let entry = state.by_agent.entry(sample.agent_id.clone()).or_default();
            entry.requests += 1;
            entry.total_latency_ms += sample.latency_ms;
        }
        debug!(
            "Recorded usage: {} latency={}ms",
            sample.agent_id, sample.latency_ms
        );
        self.persist().await;
    }
}

fn load_summary(path: &Path) -> Result<Option<UsageSummary>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let summary = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(summary))
}

async fn save_summary(path: &Path, summary: &UsageSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Format a UsageSummary as a human-readable string
pub fn format_usage_summary(summary: &UsageSummary) -> String {
    let mut out = String::new();
    out.push_str("## Usage Summary\n\n");
    out.push_str(&format!("**Requests:** {}\n\n", summary.total_requests));

    if summary.by_agent.is_empty() {
        out.push_str("No replies recorded yet.\n");
        return out;
    }

    out.push_str("| Agent | Requests | Avg latency |\n");
    out.push_str("|-------|----------|-------------|\n");
    let mut agents: Vec<_> = summary.by_agent.iter().collect();
    agents.sort_by(|a, b| b.1.requests.cmp(&a.1.requests).then_with(|| a.0.cmp(b.0)));
    for (agent_id, usage) in agents {
        out.push_str(&format!(
            "| {} | {} | {}ms |\n",
            agent_id,
            usage.requests,
            usage.average_latency_ms()
        ));
    }
    out
}
