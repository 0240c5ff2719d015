//! Turn-delimited transcript reconstructed from stable screen snapshots.
//!
//! Agent output between two user turns is one evolving message: the open
//! tail keeps its id while its content is rewritten from each new snapshot,
//! and is sealed the moment the next user submission arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::format::FormatRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    /// Keystroke passthrough; never stored in the transcript.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub time: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            time: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Whether the final message is an agent tail still being rewritten.
    tail_open: bool,
    /// Content of the most recent user submission, used to locate the echo
    /// that delimits the agent's reply region on screen.
    pending_echo: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Append a user turn. Seals any open agent tail first.
    pub fn push_user(&mut self, content: &str) -> Message {
        self.tail_open = false;
        self.pending_echo = Some(content.to_string());
        let message = Message::new(Role::User, content.to_string());
        self.messages.push(message.clone());
        message
    }

    /// Fold a new screen snapshot into the agent tail.
    ///
    /// Returns the appended or updated message when the formatted reply
    /// differs from the current tail content, `None` otherwise.
    pub fn apply_snapshot(&mut self, screen_text: &str, rules: &FormatRules) -> Option<Message> {
        let reply = rules.extract_reply(screen_text, self.pending_echo.as_deref());

        if self.tail_open {
            if let Some(tail) = self.messages.last_mut() {
                // A transiently blank screen does not erase an in-progress
                // reply.
                if reply.is_empty() || tail.content == reply {
                    return None;
                }
                tail.content = reply;
                return Some(tail.clone());
            }
            self.tail_open = false;
        }

        if reply.is_empty() {
            return None;
        }

        let message = Message::new(Role::Agent, reply);
        self.messages.push(message.clone());
        self.tail_open = true;
        Some(message)
    }
}
