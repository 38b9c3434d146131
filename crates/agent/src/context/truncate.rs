//! Length limiting for texts entering the message list.

use std::borrow::Cow;

/// Cut `text` to at most `max_chars` characters (plus a notice).
///
/// Prefers the last paragraph break in the second half of the allowed
/// prefix; otherwise cuts at the character limit. Counts characters, not
/// bytes, so the cut never splits a code point.
pub fn truncate_text(text: &str, max_chars: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(text);
    }

    let limit_byte = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let prefix = &text[..limit_byte];

    let cut = match prefix.rfind("\n\n") {
        Some(pos) if prefix[..pos].chars().count() >= max_chars / 2 => &prefix[..pos],
        _ => prefix,
    };
    let kept = cut.chars().count();

    Cow::Owned(format!(
        "{}\n\n[Text truncated: showing {kept} of {total} characters]",
        cut.trim_end()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_borrowed() {
        assert!(matches!(truncate_text("Hej", 10), Cow::Borrowed("Hej")));
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let out = truncate_text(&text, 100);
        assert!(out.starts_with(&"a".repeat(60)));
        assert!(!out.contains('b'));
        assert!(out.ends_with("[Text truncated: showing 60 of 122 characters]"));
    }

    #[test]
    fn early_paragraph_break_is_ignored() {
        let text = format!("{}\n\n{}", "a".repeat(10), "b".repeat(200));
        let out = truncate_text(&text, 100);
        assert!(out.contains("showing 100 of 212"));
        assert!(out.contains('b'));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "å".repeat(300);
        let out = truncate_text(&text, 256);
        assert!(out.starts_with(&"å".repeat(256)));
        assert!(out.contains("showing 256 of 300"));
    }
}
