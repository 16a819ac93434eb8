//! Email classification and retrieval-query construction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{complete_json, prompts};
use crate::error::PortError;
use crate::llm::{ChatMessage, LlmProvider, parse_json_reply};
use crate::ports::{Classification, Classifier, QueryConstructor};
use crate::workflow::state::Category;

const CLASSIFY_MAX_TOKENS: u32 = 128;
const QUERIES_MAX_TOKENS: u32 = 256;

#[derive(Debug, Deserialize)]
struct ClassifyReply {
    category: String,
    #[serde(default)]
    signatory_count: Option<u32>,
}

fn parse_classification(raw: &str) -> Result<Classification, String> {
    let reply: ClassifyReply = parse_json_reply(raw).map_err(|e| e.to_string())?;
    let category: Category = reply.category.parse()?;
    Ok(Classification {
        category,
        signatory_count: reply.signatory_count.unwrap_or(1),
    })
}

pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, body: &str) -> Result<Classification, PortError> {
        let messages = vec![
            ChatMessage::system(prompts::classify_system_prompt()),
            ChatMessage::user(prompts::classify_user_prompt(body)),
        ];
        let raw = complete_json(self.llm.as_ref(), messages, CLASSIFY_MAX_TOKENS)
            .await
            .map_err(|e| PortError::ClassificationFailed(e.to_string()))?;

        parse_classification(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Unparseable classification");
            PortError::ClassificationFailed(e)
        })
    }
}

#[derive(Debug, Deserialize)]
struct QueriesReply {
    queries: Vec<String>,
}

pub struct LlmQueryConstructor {
    llm: Arc<dyn LlmProvider>,
}

impl LlmQueryConstructor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QueryConstructor for LlmQueryConstructor {
    async fn construct_queries(&self, body: &str) -> Result<Vec<String>, PortError> {
        let messages = vec![
            ChatMessage::system(prompts::queries_system_prompt()),
            ChatMessage::user(prompts::queries_user_prompt(body)),
        ];
        let raw = complete_json(self.llm.as_ref(), messages, QUERIES_MAX_TOKENS)
            .await
            .map_err(|e| PortError::QueryConstructionFailed(e.to_string()))?;

        let reply: QueriesReply = parse_json_reply(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Unparseable query list");
            PortError::QueryConstructionFailed(e.to_string())
        })?;
        let queries: Vec<String> = reply
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return Err(PortError::QueryConstructionFailed(
                "model returned no queries".into(),
            ));
        }
        debug!(count = queries.len(), "Constructed retrieval queries");
        Ok(queries)
    }
}
