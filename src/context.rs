//! Per-session state shared by the pipeline components.
//!
//! A [`SessionContext`] holds everything one conversation mutates: the
//! evidence corpus, the conversation history and the request throttle.
//! Components receive it explicitly, so there is no hidden global state and
//! two sessions never share anything. A session drives one turn at a time;
//! the `&mut` borrow is the single-writer guarantee.

use crate::evidence::EvidenceCorpus;
use crate::pipeline::throttle::Throttle;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
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

/// Mutable state of one chat session.
#[derive(Debug)]
pub struct SessionContext {
    pub corpus: EvidenceCorpus,
    history: Vec<ConversationTurn>,
    pub throttle: Throttle,
}

impl SessionContext {
    /// Fresh context whose throttle spaces requests by `request_delay`.
    pub fn new(request_delay: Duration) -> Self {
        Self {
            corpus: EvidenceCorpus::new(),
            history: Vec::new(),
            throttle: Throttle::new(request_delay),
        }
    }

    /// Conversation so far, oldest first.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Append a turn. History is never rewritten.
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_append_only_in_order() {
        let mut ctx = SessionContext::new(Duration::ZERO);
        ctx.push_turn(ConversationTurn::assistant("report"));
        ctx.push_turn(ConversationTurn::user("concrete?"));
        ctx.push_turn(ConversationTurn::assistant("500 sqft"));

        let roles: Vec<Role> = ctx.history().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(ctx.history()[2].content, "500 sqft");
    }

    #[test]
    fn role_serialises_lowercase() {
        let json = serde_json::to_string(&ConversationTurn::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
