use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a conversation, containing a role and text content.
///
/// Messages are the primary data structure for chat turns relayed between a
/// live connection and a compiled flow artifact. Each message has a role
/// (typically "user", "assistant", or "system") and text content.
///
/// # Examples
///
/// ```
/// use flowchat::message::Message;
///
/// let user_msg = Message::user("What is the weather?");
/// let assistant_msg = Message::assistant("It's sunny today!");
/// assert!(user_msg.has_role(Message::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// Durable chat transcript record owned by the persistence collaborator.
///
/// The core writes these through [`crate::persistence::MessageStore`] and
/// queries them back for the history/listing endpoints; it never treats its
/// own copies as a cache of truth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned identifier; `0` until appended.
    #[serde(default)]
    pub id: i64,
    pub flow_id: String,
    pub chat_id: String,
    pub user_id: i64,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub liked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a transcript record for one turn of a live conversation.
    #[must_use]
    pub fn turn(
        flow_id: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: i64,
        message: &Message,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            flow_id: flow_id.into(),
            chat_id: chat_id.into(),
            user_id,
            role: message.role.clone(),
            content: message.content.clone(),
            liked: false,
            comment: None,
            create_time: now,
            update_time: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convenience_constructors() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, Message::USER);
        assert_eq!(user_msg.content, "Hello");

        let assistant_msg = Message::assistant("Hi there!");
        assert_eq!(assistant_msg.role, Message::ASSISTANT);

        let system_msg = Message::system("You are helpful");
        assert_eq!(system_msg.role, Message::SYSTEM);
    }

    #[test]
    fn test_role_checking() {
        let msg = Message::user("Hello");
        assert!(msg.has_role(Message::USER));
        assert!(!msg.has_role(Message::ASSISTANT));
    }

    #[test]
    fn test_serialization_round_trip() {
        let original = Message::user("Test message");
        let json = serde_json::to_string(&original).expect("serialization failed");
        let parsed: Message = serde_json::from_str(&json).expect("deserialization failed");
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_turn_record_carries_message_fields() {
        let record = ChatMessage::turn("f1", "c1", 42, &Message::assistant("done"));
        assert_eq!(record.id, 0);
        assert_eq!(record.flow_id, "f1");
        assert_eq!(record.chat_id, "c1");
        assert_eq!(record.user_id, 42);
        assert_eq!(record.role, Message::ASSISTANT);
        assert_eq!(record.content, "done");
        assert!(!record.liked);
    }
}
