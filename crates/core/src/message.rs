//! Message, content block and inbound request types.
//!
//! These are the value objects that flow through a session:
//! the caller sends a [`SessionRequest`], the context builder turns it into a
//! list of [`Message`]s, and the round controller appends assistant and
//! tool-result turns between rounds.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
///
/// System instructions are not a role here; they travel as a separate field
/// of the provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (and tool results, which the backend expects as user turns)
    User,
    /// The AI assistant
    Assistant,
}

/// The atomic unit of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Free text. Never empty when sent to the backend.
    Text { text: String },

    /// Base64 media supplied by the caller (image or PDF).
    Attachment { media_type: String, data: String },

    /// A tool invocation requested by the model.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The model-facing projection of a tool outcome.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text of a `Text` block, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single turn in the list sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user message with one text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Create an assistant message with one text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn with_blocks(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Whether `messages` satisfies the backend's ordering rules: non-empty,
/// strictly alternating roles, first and last entries from the user.
pub fn is_well_formed(messages: &[Message]) -> bool {
    let Some(first) = messages.first() else {
        return false;
    };
    let alternating = messages.windows(2).all(|w| w[0].role != w[1].role);
    let last_is_user = messages.last().is_some_and(|m| m.role == Role::User);
    first.role == Role::User && alternating && last_is_user
}

// --- Inbound request ---

/// One prior turn as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    #[serde(default)]
    pub text: String,
}

/// Caller-supplied media for the current turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub media_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// What kind of content block an attachment media type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Document,
}

impl AttachmentKind {
    /// Classify a media type; `None` for unsupported types.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type.to_ascii_lowercase().as_str() {
            "image/png" | "image/jpeg" | "image/jpg" | "image/gif" | "image/webp" => {
                Some(Self::Image)
            }
            "application/pdf" => Some(Self::Document),
            _ => None,
        }
    }
}

/// The inbound chat request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub history: Vec<HistoryTurn>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    /// Opaque context handed through to every tool invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_context: Option<serde_json::Value>,
}

impl SessionRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hej");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hej");
    }

    #[test]
    fn content_block_tags() {
        let json = serde_json::to_value(ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "lookup_security".into(),
            input: serde_json::json!({"isin": "SE0000108656"}),
        })
        .unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["input"]["isin"], "SE0000108656");

        let result = serde_json::to_value(ContentBlock::ToolResult {
            tool_use_id: "toolu_1".into(),
            content: "ok".into(),
            is_error: false,
        })
        .unwrap();
        assert!(result.get("is_error").is_none());
    }

    #[test]
    fn well_formed_lists() {
        assert!(!is_well_formed(&[]));
        assert!(is_well_formed(&[Message::user("a")]));
        assert!(is_well_formed(&[
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ]));
        assert!(!is_well_formed(&[Message::user("a"), Message::assistant("b")]));
        assert!(!is_well_formed(&[Message::user("a"), Message::user("b")]));
    }

    #[test]
    fn request_deserializes_camel_case() {
        let req: SessionRequest = serde_json::from_str(
            r#"{
                "message": "Hej",
                "history": [{"role": "assistant", "text": "Hello"}],
                "attachments": [{"mediaType": "image/png", "data": "aGVq"}],
                "toolContext": {"fundId": 7}
            }"#,
        )
        .unwrap();
        assert_eq!(req.history[0].role, Role::Assistant);
        assert_eq!(req.attachments[0].media_type, "image/png");
        assert_eq!(req.tool_context.unwrap()["fundId"], 7);
    }

    #[test]
    fn attachment_kinds() {
        assert_eq!(
            AttachmentKind::from_media_type("IMAGE/JPEG"),
            Some(AttachmentKind::Image)
        );
        assert_eq!(
            AttachmentKind::from_media_type("application/pdf"),
            Some(AttachmentKind::Document)
        );
        assert_eq!(AttachmentKind::from_media_type("text/csv"), None);
    }
}
