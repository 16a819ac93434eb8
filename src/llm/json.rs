//! Recovering structured output from model text.

use serde::de::DeserializeOwned;

use crate::error::LlmError;

/// Pull a JSON object out of model output that may be bare, fenced in a
/// markdown code block, or surrounded by prose.
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

/// Extract and deserialize a JSON object from model output.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let json = extract_json_object(text);
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[test]
    fn bare_object() {
        assert_eq!(extract_json_object("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn fenced_json_block() {
        let text = "Here you go:\n```json\n{\"send\": false}\n```\nThanks";
        assert_eq!(extract_json_object(text), "{\"send\": false}");
    }

    #[test]
    fn plain_fence() {
        let text = "```\n{\"queries\": []}\n```";
        assert_eq!(extract_json_object(text), "{\"queries\": []}");
    }

    #[test]
    fn object_inside_prose() {
        let text = "The category is {\"category\": \"unrelated\"} as requested.";
        assert_eq!(extract_json_object(text), "{\"category\": \"unrelated\"}");
    }

    #[derive(Debug, Deserialize)]
    struct Reply {
        send: bool,
    }

    #[test]
    fn parse_reply() {
        let reply: Reply = parse_json_reply("```json\n{\"send\": true}\n```").unwrap();
        assert!(reply.send);
    }

    #[test]
    fn parse_reply_rejects_non_json() {
        let result: Result<Reply, _> = parse_json_reply("I cannot answer that.");
        assert!(matches!(result, Err(LlmError::Json(_))));
    }
}
