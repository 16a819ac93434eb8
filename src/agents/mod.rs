//! LLM-backed capability implementations.
//!
//! Every agent sends one tight JSON-mode completion and parses the reply
//! into the port's structured output. Transport errors and malformed replies
//! both surface as the port's failure variant; the engine decides whether to
//! retry.

pub mod classify;
pub mod knowledge;
pub mod prompts;
pub mod writer;

pub use classify::{LlmClassifier, LlmQueryConstructor};
pub use knowledge::{KnowledgeBase, KnowledgeRetriever};
pub use writer::{LlmDrafter, LlmProofreader};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Send `messages` as a JSON-mode completion and return the trimmed content.
pub(crate) async fn complete_json(
    llm: &dyn LlmProvider,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
) -> Result<String, LlmError> {
    let request = CompletionRequest::new(messages)
        .with_max_tokens(max_tokens)
        .json();
    let response = llm.complete(request).await?;
    let content = response.content.trim();
    if content.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: llm.model_name().to_string(),
            reason: format!("empty content (finish reason {:?})", response.finish_reason),
        });
    }
    Ok(content.to_string())
}


#[cfg(test)]
mod tests {
    use super::mock::MockLlm;
    use super::*;

    #[tokio::test]
    async fn complete_json_sets_json_mode() {
        let llm = MockLlm::new(["  {\"ok\": true}  "]);
        let content = complete_json(&llm, vec![ChatMessage::user("hi")], 64)
            .await
            .unwrap();
        assert_eq!(content, "{\"ok\": true}");
        let request = llm.last_request();
        assert!(request.json_mode);
        assert_eq!(request.max_tokens, Some(64));
    }

    #[tokio::test]
    async fn complete_json_rejects_empty_content() {
        let llm = MockLlm::new(["   "]);
        let result = complete_json(&llm, vec![ChatMessage::user("hi")], 64).await;
        assert!(matches!(result, Err(LlmError::InvalidResponse { .. })));
    }
}
