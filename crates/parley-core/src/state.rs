//! UI-agnostic chat state types
//!
//! These types are shared by any front end that drives a [`crate::ChatSession`]
//! and don't depend on a specific UI framework.

use uuid::Uuid;

/// A chat message in the conversation log.
///
/// Messages are immutable once created; only the session controller creates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    id: Uuid,
    role: ChatRole,
    content: String,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatMessage {
    pub(crate) fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> ChatRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_get_distinct_ids() {
        let a = ChatMessage::new(ChatRole::User, "hi");
        let b = ChatMessage::new(ChatRole::User, "hi");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.content(), b.content());
    }
}
