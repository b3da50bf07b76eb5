//! Conversation context resolution.
//!
//! Key templates:
//! - `session:<sessionId>`                    (no topic)
//! - `session:<sessionId>:topic:<topicId>`
//!
//! `%` and `:` inside ids are percent-escaped so distinct `(session, topic)`
//! pairs can never collide on the same key. A blank topic id is treated as
//! absent.

use serde::{Deserialize, Serialize};

/// Compute the canonical context key for a `(session, topic)` pair.
///
/// Every index keyed by conversation goes through this function, so two
/// contexts are the same iff their keys are equal.
pub fn context_key(session_id: &str, topic_id: Option<&str>) -> String {
    let base = format!("session:{}", escape(session_id));
    match normalize_topic(topic_id) {
        Some(topic) => format!("{base}:topic:{}", escape(topic)),
        None => base,
    }
}

/// Trim a topic id, mapping blank values to `None`.
pub fn normalize_topic(topic_id: Option<&str>) -> Option<&str> {
    topic_id.map(str::trim).filter(|t| !t.is_empty())
}

fn escape(raw: &str) -> String {
    if !raw.contains(|c: char| c == '%' || c == ':') {
        return raw.to_owned();
    }
    let mut out = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    out
}

/// The isolation scope of a conversation: a session, optionally narrowed to
/// one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, topic_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            topic_id,
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self::new(session_id, None)
    }

    pub fn key(&self) -> String {
        context_key(&self.session_id, self.topic_id.as_deref())
    }
}
