//! Dispatch coordinator: one user message fanned out to many agents
//!
//! A round appends the user message, freezes a single snapshot of the
//! history, and fans the prompt out to every target at once. Each reply is
//! committed the moment it resolves; a failing agent only loses its own
//! branch. A reply that resolves after the history was cleared is dropped
//! rather than leaking into the new session.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::{AgentRegistry, RegisteredAgent};
use crate::attribution::attribute;
use crate::error::{AdapterError, DispatchError};
use crate::history::History;
use crate::types::Message;
use crate::mention::{RoutedMessage, route};
use crate::participants::ParticipantSet;
use crate::usage::{UsageObserver, UsageSample};

/// Progress notifications for whoever renders the conversation
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Reply {
        round_id: Uuid,
        agent_id: String,
        handle: String,
        content: String,
    },
    Failed {
        round_id: Uuid,
        agent_id: String,
        error: AdapterError,
    },
    RoundComplete {
        round_id: Uuid,
        succeeded: usize,
        failed: usize,
    },
}

/// How one target's branch of a round ended
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    Replied {
        agent_id: String,
        content: String,
        latency_ms: u64,
    },
    Failed {
        agent_id: String,
        error: AdapterError,
    },
    /// Replied, but the history was cleared while the call was in flight
    Stale { agent_id: String },
}

impl TargetOutcome {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Replied { agent_id, .. }
            | Self::Failed { agent_id, .. }
            | Self::Stale { agent_id } => agent_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Replied { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Result of a whole round, outcomes in completion order
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub round_id: Uuid,
    pub outcomes: Vec<TargetOutcome>,
    /// Targets dropped before fan-out (manual agents)
    pub skipped: Vec<String>,
}

impl RoundOutcome {
    /// No adapter was invoked; the message was only saved
    pub fn is_passive(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TargetOutcome::Failed { .. }))
    }

    pub fn stale(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| o.is_stale())
    }
}

/// Runs dispatch rounds against a registry and a shared history.
///
/// Cheap to clone; clones share the same history and collaborators, so
/// several rounds may be in flight at once.
#[derive(Clone)]
pub struct DispatchCoordinator {
    registry: Arc<AgentRegistry>,
    history: History,
    events: Option<mpsc::UnboundedSender<DispatchEvent>>,
    usage: Option<Arc<dyn UsageObserver>>,
}

impl DispatchCoordinator {
    pub fn new(registry: Arc<AgentRegistry>, history: History) -> Self {
        Self {
            registry,
            history,
            events: None,
            usage: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_usage_observer(mut self, usage: Arc<dyn UsageObserver>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Route `text` against the current participants and dispatch it
    pub async fn send(
        &self,
        text: &str,
        participants: &ParticipantSet,
    ) -> Result<RoundOutcome, DispatchError> {
        let routed = route(text, &participants.profiles());
        self.dispatch(&routed).await
    }

    /// Run one round for an already-routed message
    pub async fn dispatch(&self, routed: &RoutedMessage) -> Result<RoundOutcome, DispatchError> {
        let round_id = Uuid::new_v4();

        let mut agents: Vec<RegisteredAgent> = Vec::with_capacity(routed.targets.len());
        let mut skipped = Vec::new();
        for id in &routed.targets {
            let agent = self
                .registry
                .get(id)
                .ok_or_else(|| DispatchError::UnknownTarget(id.clone()))?;
            if agents.iter().any(|a| a.profile.id == *id) || skipped.contains(id) {
                continue;
            }
            if !agent.profile.capability.is_dispatchable() {
                debug!("Round {}: skipping {} agent '{}'", round_id, agent.profile.capability, id);
                skipped.push(id.clone());
                continue;
            }
            agents.push(agent);
        }

        if agents.is_empty() {
            self.history.append_user(routed.raw.clone());
            debug!("Round {}: no dispatchable targets, message saved", round_id);
            return Ok(RoundOutcome {
                round_id,
                outcomes: Vec::new(),
                skipped,
            });
        }

        let snapshot = self
            .history
            .append_and_snapshot(Message::user(routed.raw.clone()));
        let generation = snapshot.generation();
        info!(
            "Round {}: dispatching to {} agent(s) over {} history entries",
            round_id,
            agents.len(),
            snapshot.len()
        );

        let mut pending: FuturesUnordered<_> = agents
            .into_iter()
            .map(|agent| {
                let snapshot = snapshot.clone();
                let body = routed.body.as_str();
                async move {
                    let started = Instant::now();
                    let view = attribute(&snapshot, &agent.profile.id);
                    let result = agent.adapter.send_prompt(body, &view).await;
                    (agent, result, started.elapsed().as_millis() as u64)
                }
            })
            .collect();

        let mut outcomes = Vec::new();
        while let Some((agent, result, latency_ms)) = pending.next().await {
            outcomes.push(
                self.commit(round_id, generation, agent, result, latency_ms)
                    .await,
            );
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, TargetOutcome::Failed { .. }))
            .count();
        info!(
            "Round {} complete: {} replied, {} failed, {} stale",
            round_id,
            succeeded,
            failed,
            outcomes.len() - succeeded - failed
        );
        self.emit(DispatchEvent::RoundComplete {
            round_id,
            succeeded,
            failed,
        });

        Ok(RoundOutcome {
            round_id,
            outcomes,
            skipped,
        })
    }

    /// Record a reply that a human relayed from an external chat
    pub fn paste_reply(&self, agent_id: &str, text: &str) -> Result<usize, DispatchError> {
        let profile = self
            .registry
            .profile(agent_id)
            .ok_or_else(|| DispatchError::UnknownTarget(agent_id.to_string()))?;
        let index = self.history.append_reply(&profile, text);
        info!("Pasted reply from {} at entry #{}", profile.handle, index);
        Ok(index)
    }

    async fn commit(
        &self,
        round_id: Uuid,
        generation: u64,
        agent: RegisteredAgent,
        result: Result<String, AdapterError>,
        latency_ms: u64,
    ) -> TargetOutcome {
        let profile = agent.profile;
        match result {
            Ok(content) => {
                if self
                    .history
                    .append_reply_in(generation, &profile, content.clone())
                    .is_none()
                {
                    info!(
                        "Round {}: history cleared before {} replied, reply dropped",
                        round_id, profile.handle
                    );
                    return TargetOutcome::Stale { agent_id: profile.id };
                }
                debug!("Round {}: {} replied in {}ms", round_id, profile.handle, latency_ms);
                self.emit(DispatchEvent::Reply {
                    round_id,
                    agent_id: profile.id.clone(),
                    handle: profile.handle.clone(),
                    content: content.clone(),
                });
                if let Some(usage) = &self.usage {
                    usage
                        .record(&UsageSample {
                            agent_id: profile.id.clone(),
                            latency_ms,
                        })
                        .await;
                }
                TargetOutcome::Replied {
                    agent_id: profile.id,
                    content,
                    latency_ms,
                }
            }
            Err(error) => {
                warn!("Round {}: {} failed: {}", round_id, profile.handle, error);
                self.emit(DispatchEvent::Failed {
                    round_id,
                    agent_id: profile.id.clone(),
                    error: error.clone(),
                });
                TargetOutcome::Failed {
                    agent_id: profile.id,
                    error,
                }
            }
        }
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("Dispatch event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::MemoryParticipantStore;
    use crate::test_utils::ScriptedAdapter;
    use crate::types::{Capability, Role};
    use crate::usage::{UsageConfig, UsageTracker};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn setup(adapters: Vec<Arc<ScriptedAdapter>>) -> (Arc<AgentRegistry>, DispatchCoordinator) {
        let registry = Arc::new(AgentRegistry::new());
        for adapter in adapters {
            registry.register(adapter);
        }
        let coordinator = DispatchCoordinator::new(registry.clone(), History::new());
        (registry, coordinator)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DispatchEvent>) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_passive_message_is_saved_only() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "hi"));
        let (registry, coordinator) = setup(vec![a.clone()]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = coordinator.with_events(tx);

        let participants = ParticipantSet::new(registry, Arc::new(MemoryParticipantStore::new()));
        participants.join("a");

        let outcome = coordinator.send("My name is Kiryl", &participants).await.unwrap();
        assert!(outcome.is_passive());
        assert_eq!(coordinator.history().len(), 1);
        assert_eq!(a.calls(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_all_reaches_every_participant() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "from a"));
        let b = Arc::new(ScriptedAdapter::replying("b", "Bravo", "from b"));
        let (registry, coordinator) = setup(vec![a.clone(), b.clone()]);
        let participants = ParticipantSet::new(registry, Arc::new(MemoryParticipantStore::new()));
        participants.join("a");
        participants.join("b");

        let outcome = coordinator.send("@all hello", &participants).await.unwrap();
        assert_eq!(outcome.successes().count(), 2);
        assert_eq!(coordinator.history().len(), 3);
        assert_eq!(a.seen_bodies(), vec!["hello"]);
        assert_eq!(b.seen_bodies(), vec!["hello"]);

        // Raw text is what lands in history
        assert_eq!(coordinator.history().snapshot()[0].content, "@all hello");
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "fine"));
        let b = Arc::new(ScriptedAdapter::failing(
            "b",
            "Bravo",
            AdapterError::Transport("connection refused".to_string()),
        ));
        let (_registry, coordinator) = setup(vec![a, b]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = coordinator.with_events(tx);

        let routed = RoutedMessage::to_targets("question", ids(&["a", "b"]));
        let outcome = coordinator.dispatch(&routed).await.unwrap();

        assert_eq!(outcome.successes().count(), 1);
        assert_eq!(outcome.failures().count(), 1);
        assert_eq!(coordinator.history().len(), 2);
        let history = coordinator.history().snapshot();
        assert!(history[1].is_authored_by("a"));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events.iter().any(|e| matches!(e, DispatchEvent::Reply { agent_id, .. } if agent_id == "a")));
        assert!(events.iter().any(|e| matches!(e, DispatchEvent::Failed { agent_id, .. } if agent_id == "b")));
        assert!(matches!(
            events.last(),
            Some(DispatchEvent::RoundComplete { succeeded: 1, failed: 1, .. })
        ));
    }

    async fn race(first: &str) -> (History, Arc<ScriptedAdapter>, Arc<ScriptedAdapter>) {
        let gate_x = Arc::new(Notify::new());
        let gate_y = Arc::new(Notify::new());
        let x = Arc::new(ScriptedAdapter::replying("x", "Xray", "from x").with_gate(gate_x.clone()));
        let y = Arc::new(ScriptedAdapter::replying("y", "Yankee", "from y").with_gate(gate_y.clone()));
        let (_registry, coordinator) = setup(vec![x.clone(), y.clone()]);
        coordinator.history().append_user("earlier");
        let history = coordinator.history().clone();

        let routed = RoutedMessage::to_targets("go", ids(&["x", "y"]));
        let handle = tokio::spawn(async move { coordinator.dispatch(&routed).await });

        while x.calls() == 0 || y.calls() == 0 {
            tokio::task::yield_now().await;
        }
        let (first_gate, second_gate) = if first == "x" { (gate_x, gate_y) } else { (gate_y, gate_x) };
        first_gate.notify_one();
        while history.len() < 3 {
            tokio::task::yield_now().await;
        }
        second_gate.notify_one();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.successes().count(), 2);
        (history, x, y)
    }

    #[tokio::test]
    async fn test_completion_order_does_not_change_views() {
        for first in ["x", "y"] {
            let (history, x, y) = race(first).await;
            let entries = history.snapshot();
            assert_eq!(entries.len(), 4);
            assert_eq!(entries.iter().filter(|m| m.is_authored_by("x")).count(), 1);
            assert_eq!(entries.iter().filter(|m| m.is_authored_by("y")).count(), 1);
            assert!(entries[2].is_authored_by(first));

            let x_view = &x.seen_views()[0];
            let y_view = &y.seen_views()[0];
            assert_eq!(x_view.len(), 2);
            assert_eq!(x_view, y_view);
            assert_eq!(x_view[1].content, "go");
        }
    }

    #[tokio::test]
    async fn test_views_are_agent_relative() {
        let a = Arc::new(ScriptedAdapter::replying("a", "A", "first"));
        let b = Arc::new(ScriptedAdapter::replying("b", "B", "second"));
        let (_registry, coordinator) = setup(vec![a.clone(), b.clone()]);

        coordinator
            .dispatch(&RoutedMessage::to_targets("hi a", ids(&["a"])))
            .await
            .unwrap();
        coordinator
            .dispatch(&RoutedMessage::to_targets("hi both", ids(&["a", "b"])))
            .await
            .unwrap();

        let a_view = &a.seen_views()[1];
        let b_view = &b.seen_views()[0];
        assert_eq!(a_view[1].role, Role::Assistant);
        assert_eq!(b_view[1].role, Role::User);
        assert_eq!(b_view[1].content, "@A wrote:\nfirst");
    }

    #[tokio::test]
    async fn test_unknown_target_fails_before_append() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "hi"));
        let (_registry, coordinator) = setup(vec![a.clone()]);

        let routed = RoutedMessage::to_targets("hello", ids(&["a", "ghost"]));
        let err = coordinator.dispatch(&routed).await.unwrap_err();
        assert_eq!(err, DispatchError::UnknownTarget("ghost".to_string()));
        assert!(coordinator.history().is_empty());
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_targets_dispatch_once() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "hi"));
        let (_registry, coordinator) = setup(vec![a.clone()]);

        let routed = RoutedMessage::to_targets("hello", ids(&["a", "a"]));
        let outcome = coordinator.dispatch(&routed).await.unwrap();
        assert_eq!(outcome.outcomes.len(), 1);
        assert_eq!(a.calls(), 1);
        assert_eq!(coordinator.history().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_targets_are_skipped() {
        let manual = Arc::new(
            ScriptedAdapter::replying("m", "Manual Chat", "never").with_capability(Capability::Manual),
        );
        let (_registry, coordinator) = setup(vec![manual.clone()]);

        let routed = RoutedMessage::to_targets("hello", ids(&["m"]));
        let outcome = coordinator.dispatch(&routed).await.unwrap();
        assert!(outcome.is_passive());
        assert_eq!(outcome.skipped, ids(&["m"]));
        assert_eq!(manual.calls(), 0);
        assert_eq!(coordinator.history().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_then_passive() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "hi"));
        let (_registry, coordinator) = setup(vec![a]);
        coordinator
            .dispatch(&RoutedMessage::to_targets("hello", ids(&["a"])))
            .await
            .unwrap();
        assert_eq!(coordinator.history().len(), 2);

        coordinator.history().clear();
        coordinator.history().clear();
        coordinator.dispatch(&RoutedMessage::passive("again")).await.unwrap();
        assert_eq!(coordinator.history().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_after_clear_is_dropped() {
        let gate = Arc::new(Notify::new());
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "late reply").with_gate(gate.clone()));
        let (_registry, coordinator) = setup(vec![a.clone()]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(UsageTracker::new(UsageConfig::default()));
        let coordinator = coordinator.with_events(tx).with_usage_observer(tracker.clone());
        let history = coordinator.history().clone();

        let round = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .dispatch(&RoutedMessage::to_targets("question", ids(&["a"])))
                    .await
            })
        };
        while a.calls() == 0 {
            tokio::task::yield_now().await;
        }

        history.clear();
        coordinator.dispatch(&RoutedMessage::passive("fresh")).await.unwrap();
        gate.notify_one();

        let outcome = round.await.unwrap().unwrap();
        assert_eq!(outcome.successes().count(), 0);
        assert_eq!(outcome.failures().count(), 0);
        assert_eq!(outcome.stale().count(), 1);
        assert_eq!(outcome.outcomes[0].agent_id(), "a");

        let entries = history.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "fresh");
        assert_eq!(tracker.snapshot().total_requests, 0);

        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, DispatchEvent::Reply { .. })));
        assert!(matches!(
            events.last(),
            Some(DispatchEvent::RoundComplete { succeeded: 0, failed: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_hung_agent_blocks_neither_siblings_nor_new_rounds() {
        // Never notified
        let hung = Arc::new(
            ScriptedAdapter::replying("h", "Hung", "never").with_gate(Arc::new(Notify::new())),
        );
        let b = Arc::new(ScriptedAdapter::replying("b", "Bravo", "quick"));
        let (_registry, coordinator) = setup(vec![hung, b.clone()]);
        let history = coordinator.history().clone();

        let stuck = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .dispatch(&RoutedMessage::to_targets("both", ids(&["h", "b"])))
                    .await
            })
        };

        tokio::time::timeout(Duration::from_secs(2), async {
            while history.len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("sibling reply was not committed while the other agent hung");
        assert!(history.snapshot()[1].is_authored_by("b"));

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.dispatch(&RoutedMessage::to_targets("again", ids(&["b"]))),
        )
        .await
        .expect("new round did not finish while an earlier round hung")
        .unwrap();
        assert_eq!(outcome.successes().count(), 1);
        assert_eq!(history.len(), 4);
        assert_eq!(b.calls(), 2);

        assert!(!stuck.is_finished());
        stuck.abort();
    }

    #[tokio::test]
    async fn test_usage_observer_sees_successes_only() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "hi"));
        let b = Arc::new(ScriptedAdapter::failing(
            "b",
            "Bravo",
            AdapterError::AuthMissing("Bravo".to_string()),
        ));
        let (_registry, coordinator) = setup(vec![a, b]);
        let tracker = Arc::new(UsageTracker::new(UsageConfig::default()));
        let coordinator = coordinator.with_usage_observer(tracker.clone());

        coordinator
            .dispatch(&RoutedMessage::to_targets("hello", ids(&["a", "b"])))
            .await
            .unwrap();

        let summary = tracker.snapshot();
        assert_eq!(summary.total_requests, 1);
        assert!(summary.by_agent.contains_key("a"));
        assert!(!summary.by_agent.contains_key("b"));
    }

    #[tokio::test]
    async fn test_paste_reply() {
        let manual = Arc::new(
            ScriptedAdapter::replying("m", "Manual Chat", "").with_capability(Capability::Manual),
        );
        let (_registry, coordinator) = setup(vec![manual]);

        assert_eq!(coordinator.paste_reply("m", "pasted").unwrap(), 0);
        let entry = &coordinator.history().snapshot()[0];
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.author_handle.as_deref(), Some("@ManualChat"));

        let err = coordinator.paste_reply("ghost", "x").unwrap_err();
        assert_eq!(err, DispatchError::UnknownTarget("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_break_round() {
        let a = Arc::new(ScriptedAdapter::replying("a", "Alpha", "hi"));
        let (_registry, coordinator) = setup(vec![a]);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let coordinator = coordinator.with_events(tx);

        let outcome = coordinator
            .dispatch(&RoutedMessage::to_targets("hello", ids(&["a"])))
            .await
            .unwrap();
        assert_eq!(outcome.successes().count(), 1);
    }
}
