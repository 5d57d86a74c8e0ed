//! The shared, append-only conversation history

use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::agents::AgentProfile;
use crate::types::Message;

/// Immutable copy of the history at one point in time, tagged with the
/// session generation it was taken from
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Arc<[Message]>,
    generation: u64,
}

impl Snapshot {
    /// Bumped by every [`History::clear`]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for Snapshot {
    type Target = [Message];

    fn deref(&self) -> &[Message] {
        &self.entries
    }
}

#[derive(Default)]
struct Log {
    entries: Vec<Message>,
    generation: u64,
}

impl Log {
    fn push(&mut self, message: Message) -> usize {
        self.entries.push(message);
        let index = self.entries.len() - 1;
        debug!(
            "History: committed entry #{} ({}) in generation {}",
            index, self.entries[index].role, self.generation
        );
        index
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: Arc::from(self.entries.as_slice()),
            generation: self.generation,
        }
    }
}

/// One session's conversation, shared by the user and every agent.
///
/// Entries are only ever appended; a committed entry never moves or changes.
/// Readers get a [`Snapshot`], never a live reference, and the lock is only
/// held for the length of a push or a copy.
#[derive(Clone, Default)]
pub struct History {
    log: Arc<RwLock<Log>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, returning its position
    pub fn append(&self, message: Message) -> usize {
        self.log.write().unwrap_or_else(PoisonError::into_inner).push(message)
    }

    pub fn append_user(&self, content: impl Into<String>) -> usize {
        self.append(Message::user(content))
    }

    pub fn append_reply(&self, author: &AgentProfile, content: impl Into<String>) -> usize {
        self.append(Message::reply(author, content))
    }

    /// Append `message` and snapshot the result under one lock
    pub fn append_and_snapshot(&self, message: Message) -> Snapshot {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        log.push(message);
        log.snapshot()
    }

    /// Append a reply only if no clear happened since `generation`.
    /// Returns `None` when the reply belongs to a cleared session.
    pub fn append_reply_in(
        &self,
        generation: u64,
        author: &AgentProfile,
        content: impl Into<String>,
    ) -> Option<usize> {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        if log.generation != generation {
            debug!(
                "History: dropping reply from {} for generation {} (now {})",
                author.handle, generation, log.generation
            );
            return None;
        }
        Some(log.push(Message::reply(author, content)))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.log.read().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.log.read().unwrap_or_else(PoisonError::into_inner).generation
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the whole session and start a new generation. Individual entries
    /// are never removed.
    pub fn clear(&self) {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = log.entries.len();
        log.entries.clear();
        log.generation += 1;
        info!("History: cleared {} entries, generation {}", dropped, log.generation);
    }

    /// Plain-text rendering, one block per entry
    pub fn transcript(&self) -> String {
        self.snapshot()
            .iter()
            .map(|msg| {
                let who = msg.author_handle.as_deref().unwrap_or("@User");
                format!("{} ({}):\n{}", who, msg.created_at.format("%H:%M:%S"), msg.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
