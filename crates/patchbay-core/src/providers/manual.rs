//! Manual relay, an agent reached by a human copying text in and out of an
//! external chat window
//!
//! The coordinator never calls it. Instead the user asks for the part of the
//! conversation the external chat has not seen yet, pastes it over, and
//! pastes the answer back with `DispatchCoordinator::paste_reply`.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::adapter::AgentAdapter;
use crate::agents::handle_for;
use crate::attribution::ViewMessage;
use crate::error::AdapterError;
use crate::types::{AgentStatus, Capability, Message};

pub const NOTHING_TO_SYNC: &str = "No new messages to sync.";

const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug)]
pub struct ManualRelay {
    id: String,
    name: String,
    /// Number of history entries already handed out
    synced: Mutex<usize>,
}

impl ManualRelay {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            synced: Mutex::new(0),
        }
    }

    /// Everything since the last sync, formatted for pasting into another
    /// chat. Advances the sync cursor.
    pub fn delta_context(&self, history: &[Message]) -> String {
        let mut synced = self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        if *synced > history.len() {
            debug!("{}: history shrank, resetting sync cursor", self.id);
            *synced = 0;
        }
        let fresh = &history[*synced..];
        if fresh.is_empty() {
            return NOTHING_TO_SYNC.to_string();
        }

        let blocks: Vec<String> = fresh
            .iter()
            .map(|msg| format!("{}:\n{}", speaker(msg), msg.content))
            .collect();
        *synced = history.len();
        debug!("{}: synced {} new message(s)", self.id, blocks.len());

        format!(
            "You are {}. Continue the conversation based on the following history:{}{}",
            handle_for(&self.name),
            BLOCK_SEPARATOR,
            blocks.join(BLOCK_SEPARATOR)
        )
    }

    /// Forget what has been synced
    pub fn reset(&self) {
        *self.synced.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }
}

fn speaker(msg: &Message) -> String {
    if msg.is_user() {
        return "@User".to_string();
    }
    match (&msg.author_handle, &msg.author_id) {
        (Some(handle), _) => handle.clone(),
        (None, Some(id)) => format!("[@{}]", id),
        (None, None) => "[@unknown]".to_string(),
    }
}

#[async_trait]
impl AgentAdapter for ManualRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Manual
    }

    async fn check_status(&self) -> AgentStatus {
        AgentStatus::Ready
    }

    async fn send_prompt(&self, _body: &str, _view: &[ViewMessage]) -> Result<String, AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "{} is a manual relay; sync context and paste replies instead",
            self.name
        )))
    }
}
