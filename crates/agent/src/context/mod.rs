//! Session context builder.
//!
//! Turns a raw [`SessionRequest`] into the message list sent to the backend:
//!
//! | Rule | Effect |
//! |------|--------|
//! | Blank history entries | dropped |
//! | Entry with the same role as the previous kept entry | dropped |
//! | Leading assistant entries | dropped |
//! | Trailing user entry, when a current turn exists | dropped |
//! | Trailing assistant entries, when there is no current turn | dropped |
//! | Attachments | placed before the text in the current turn |
//! | Over-long text | truncated at a paragraph boundary with a notice |
//!
//! An empty result is an input error and no backend call is made.

pub mod truncate;

use base64::Engine;
use fundwise_core::error::SessionError;
use fundwise_core::message::{
    Attachment, AttachmentKind, ContentBlock, Message, Role, SessionRequest,
};

pub use truncate::truncate_text;

#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_text_chars: usize,
}

impl ContextBuilder {
    pub fn new(max_text_chars: usize) -> Self {
        Self { max_text_chars }
    }

    pub fn build(&self, request: &SessionRequest) -> Result<Vec<Message>, SessionError> {
        let mut messages: Vec<Message> = Vec::with_capacity(request.history.len() + 1);

        for turn in &request.history {
            if turn.text.trim().is_empty() {
                continue;
            }
            if messages.last().is_some_and(|m| m.role == turn.role) {
                continue;
            }
            if messages.is_empty() && turn.role == Role::Assistant {
                continue;
            }
            messages.push(Message::with_blocks(
                turn.role,
                vec![ContentBlock::text(truncate_text(&turn.text, self.max_text_chars))],
            ));
        }

        let current = self.current_turn(request)?;
        match current {
            Some(turn) => {
                if messages.last().is_some_and(|m| m.role == Role::User) {
                    messages.pop();
                }
                messages.push(turn);
            }
            None => {
                while messages.last().is_some_and(|m| m.role == Role::Assistant) {
                    messages.pop();
                }
            }
        }

        if messages.is_empty() {
            return Err(SessionError::Input(
                "message is empty and history has no user turn".into(),
            ));
        }

        Ok(messages)
    }

    /// The current user turn, attachments first.
    fn current_turn(&self, request: &SessionRequest) -> Result<Option<Message>, SessionError> {
        let mut blocks = request
            .attachments
            .iter()
            .map(attachment_block)
            .collect::<Result<Vec<_>, _>>()?;

        if !request.message.trim().is_empty() {
            blocks.push(ContentBlock::text(truncate_text(
                &request.message,
                self.max_text_chars,
            )));
        }

        if blocks.is_empty() {
            return Ok(None);
        }
        Ok(Some(Message::with_blocks(Role::User, blocks)))
    }
}

/// Validate an attachment and turn it into a content block.
///
/// Accepts bare base64 or a `data:<type>;base64,` URL.
fn attachment_block(attachment: &Attachment) -> Result<ContentBlock, SessionError> {
    let media_type = attachment.media_type.trim().to_ascii_lowercase();
    if AttachmentKind::from_media_type(&media_type).is_none() {
        return Err(SessionError::Input(format!(
            "unsupported attachment type '{}'",
            attachment.media_type
        )));
    }

    let data = match attachment.data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => attachment.data.as_str(),
    };
    let data: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if data.is_empty() {
        return Err(SessionError::Input(format!("attachment of type {media_type} is empty")));
    }
    base64::engine::general_purpose::STANDARD
        .decode(&data)
        .map_err(|e| SessionError::Input(format!("attachment is not valid base64: {e}")))?;

    let media_type = if media_type == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        media_type
    };
    Ok(ContentBlock::Attachment { media_type, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundwise_core::message::{HistoryTurn, is_well_formed};

    fn turn(role: Role, text: &str) -> HistoryTurn {
        HistoryTurn {
            role,
            text: text.into(),
        }
    }

    fn roles(messages: &[Message]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    fn builder() -> ContextBuilder {
        ContextBuilder::new(24_000)
    }

    #[test]
    fn empty_history_single_message() {
        let messages = builder().build(&SessionRequest::new("Hej")).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "Hej");
        assert!(is_well_formed(&messages));
    }

    #[test]
    fn blank_and_repeated_roles_are_dropped() {
        let request = SessionRequest {
            message: "And the fees?".into(),
            history: vec![
                turn(Role::Assistant, "Welcome!"),
                turn(Role::User, "What is SE0000108656?"),
                turn(Role::User, "Hello?"),
                turn(Role::Assistant, "   "),
                turn(Role::Assistant, "It is Ericsson B."),
                turn(Role::Assistant, "Anything else?"),
            ],
            ..Default::default()
        };
        let messages = builder().build(&request).unwrap();
        assert_eq!(roles(&messages), vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(messages[0].text(), "What is SE0000108656?");
        assert_eq!(messages[1].text(), "It is Ericsson B.");
        assert_eq!(messages[2].text(), "And the fees?");
    }

    #[test]
    fn trailing_user_history_replaced_by_current_turn() {
        let request = SessionRequest {
            message: "second try".into(),
            history: vec![turn(Role::User, "first try")],
            ..Default::default()
        };
        let messages = builder().build(&request).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "second try");
    }

    #[test]
    fn no_current_turn_trims_trailing_assistant() {
        let request = SessionRequest {
            message: "  ".into(),
            history: vec![turn(Role::User, "Hi"), turn(Role::Assistant, "Hello")],
            ..Default::default()
        };
        let messages = builder().build(&request).unwrap();
        assert_eq!(roles(&messages), vec![Role::User]);
    }

    #[test]
    fn empty_request_is_input_error() {
        let request = SessionRequest {
            history: vec![turn(Role::Assistant, "Hello")],
            ..Default::default()
        };
        assert!(matches!(
            builder().build(&request),
            Err(SessionError::Input(_))
        ));
    }

    #[test]
    fn attachments_precede_text() {
        let request = SessionRequest {
            message: "Summarize this".into(),
            attachments: vec![
                Attachment {
                    media_type: "application/pdf".into(),
                    data: "JVBERi0xLjQK".into(),
                },
                Attachment {
                    media_type: "image/jpg".into(),
                    data: "data:image/jpeg;base64,/9j/4AAQ".into(),
                },
            ],
            ..Default::default()
        };
        let messages = builder().build(&request).unwrap();
        let content = &messages[0].content;
        assert_eq!(content.len(), 3);
        assert!(matches!(&content[0], ContentBlock::Attachment { media_type, .. } if media_type == "application/pdf"));
        assert!(matches!(&content[1], ContentBlock::Attachment { media_type, data } if media_type == "image/jpeg" && data == "/9j/4AAQ"));
        assert_eq!(content[2].as_text(), Some("Summarize this"));
    }

    #[test]
    fn attachment_only_turn_is_valid() {
        let request = SessionRequest {
            attachments: vec![Attachment {
                media_type: "image/png".into(),
                data: "aGVq".into(),
            }],
            ..Default::default()
        };
        assert_eq!(builder().build(&request).unwrap().len(), 1);
    }

    #[test]
    fn unsupported_or_invalid_attachments_rejected() {
        let mut request = SessionRequest::new("x");
        request.attachments = vec![Attachment {
            media_type: "text/csv".into(),
            data: "YSxi".into(),
        }];
        assert!(matches!(builder().build(&request), Err(SessionError::Input(m)) if m.contains("text/csv")));

        request.attachments = vec![Attachment {
            media_type: "image/png".into(),
            data: "not base64!!".into(),
        }];
        assert!(matches!(builder().build(&request), Err(SessionError::Input(m)) if m.contains("base64")));
    }

    #[test]
    fn long_message_is_truncated() {
        let request = SessionRequest::new("x".repeat(1_000));
        let messages = ContextBuilder::new(300).build(&request).unwrap();
        let text = messages[0].text();
        assert!(text.contains("[Text truncated: showing 300 of 1000 characters]"));
    }

    #[test]
    fn built_lists_always_alternate() {
        let shapes: [&[(Role, &str)]; 4] = [
            &[(Role::User, "a"), (Role::User, "b"), (Role::User, "c")],
            &[(Role::Assistant, "a"), (Role::Assistant, "b")],
            &[(Role::User, "a"), (Role::Assistant, ""), (Role::Assistant, "b"), (Role::User, "")],
            &[(Role::User, "a"), (Role::Assistant, "b"), (Role::User, "c"), (Role::Assistant, "d")],
        ];
        for shape in shapes {
            for message in ["", "now"] {
                let request = SessionRequest {
                    message: message.into(),
                    history: shape.iter().map(|(r, t)| turn(*r, t)).collect(),
                    ..Default::default()
                };
                if let Ok(messages) = builder().build(&request) {
                    assert!(is_well_formed(&messages), "{shape:?} / {message:?}");
                }
            }
        }
    }
}
