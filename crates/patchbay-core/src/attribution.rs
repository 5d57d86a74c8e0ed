//! Agent-relative views of the shared history
//!
//! Every agent sees the same thread, but from its own seat: its own turns stay
//! assistant turns, everybody else's become attributed user turns. Without
//! this an agent would read a sibling's reply as something it said itself.

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

/// One turn of an agent-relative view, ready for a vendor wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMessage {
    pub role: Role,
    pub content: String,
}

impl ViewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Project `history` into the view of agent `viewer_id`.
///
/// Pure: the same snapshot and viewer always give the same output.
pub fn attribute(history: &[Message], viewer_id: &str) -> Vec<ViewMessage> {
    history.iter().map(|msg| view_of(msg, viewer_id)).collect()
}

fn view_of(msg: &Message, viewer_id: &str) -> ViewMessage {
    if msg.is_user() {
        return ViewMessage::user(msg.content.clone());
    }
    if msg.is_authored_by(viewer_id) {
        return ViewMessage::assistant(msg.content.clone());
    }
    ViewMessage::user(format!("{} wrote:\n{}", attribution_label(msg), msg.content))
}

/// Header label for a foreign turn: the author's handle, else `[<id>]`
fn attribution_label(msg: &Message) -> String {
    match (&msg.author_handle, &msg.author_id) {
        (Some(handle), _) => handle.clone(),
        (None, Some(id)) => format!("[{}]", id),
        (None, None) => "[unknown]".to_string(),
    }
}
