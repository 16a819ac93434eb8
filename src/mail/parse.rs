//! RFC 822 message → `EmailRecord`.

use mail_parser::{HeaderValue, MessageParser, MimeHeaders};

use crate::workflow::state::EmailRecord;

/// Parse a raw message. `id` is the mailbox-native identifier (IMAP UID).
pub fn parse_email(id: &str, raw: &[u8]) -> Option<EmailRecord> {
    let parsed = MessageParser::default().parse(raw)?;

    let message_id = parsed
        .message_id()
        .map(|s| format!("<{}>", s.trim_matches(|c| c == '<' || c == '>')))
        .unwrap_or_default();
    let references = extract_references(parsed.references());
    let thread_id = references
        .first()
        .cloned()
        .unwrap_or_else(|| message_id.clone());

    Some(EmailRecord {
        id: id.to_string(),
        thread_id,
        message_id,
        references: references.join(" "),
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: extract_text(&parsed),
    })
}

fn extract_references(value: &HeaderValue<'_>) -> Vec<String> {
    let ids: Vec<&str> = match value {
        HeaderValue::Text(id) => vec![id.as_ref()],
        HeaderValue::TextList(ids) => ids.iter().map(|s| s.as_ref()).collect(),
        _ => Vec::new(),
    };
    ids.into_iter()
        .map(|id| format!("<{}>", id.trim_matches(|c| c == '<' || c == '>')))
        .collect()
}

fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
