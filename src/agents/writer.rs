//! Reply drafting and proofreading.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{complete_json, prompts};
use crate::error::PortError;
use crate::llm::{ChatMessage, LlmProvider, parse_json_reply};
use crate::ports::{DraftRequest, Drafter, Proofreader, Verdict};
use crate::workflow::state::{Role, Turn};

const DRAFT_MAX_TOKENS: u32 = 1024;
const PROOFREAD_MAX_TOKENS: u32 = 256;

pub const DEFAULT_SIGNATURE: &str = "The Support Team";

#[derive(Debug, Deserialize)]
struct DraftReply {
    email: String,
}

/// Replays earlier drafts as assistant turns and feedback as user turns.
fn history_messages(history: &[Turn]) -> impl Iterator<Item = ChatMessage> + '_ {
    history.iter().map(|turn| match turn.role {
        Role::Assistant => ChatMessage::assistant(&turn.content),
        Role::User => ChatMessage::user(format!("Reviewer feedback: {}", turn.content)),
    })
}

pub struct LlmDrafter {
    llm: Arc<dyn LlmProvider>,
    signature: String,
}

impl LlmDrafter {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }
}

#[async_trait]
impl Drafter for LlmDrafter {
    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, PortError> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage::system(prompts::draft_system_prompt(
            &self.signature,
        )));
        messages.extend(history_messages(request.history));
        messages.push(ChatMessage::user(prompts::draft_user_prompt(
            request.email,
            request.category,
            request.signatory_count,
            request.context,
        )));

        let raw = complete_json(self.llm.as_ref(), messages, DRAFT_MAX_TOKENS)
            .await
            .map_err(|e| PortError::DraftFailed(e.to_string()))?;

        let reply: DraftReply = parse_json_reply(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Unparseable draft");
            PortError::DraftFailed(e.to_string())
        })?;
        let draft = reply.email.trim().to_string();
        if draft.is_empty() {
            return Err(PortError::DraftFailed("model returned an empty draft".into()));
        }
        debug!(
            email_id = %request.email.id,
            history = request.history.len(),
            chars = draft.len(),
            "Draft written"
        );
        Ok(draft)
    }
}

#[derive(Debug, Deserialize)]
struct ProofreadReply {
    #[serde(alias = "sendable")]
    send: bool,
    #[serde(default)]
    feedback: String,
}

pub struct LlmProofreader {
    llm: Arc<dyn LlmProvider>,
}

impl LlmProofreader {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Proofreader for LlmProofreader {
    async fn proofread(&self, original_body: &str, draft: &str) -> Result<Verdict, PortError> {
        let messages = vec![
            ChatMessage::system(prompts::proofread_system_prompt()),
            ChatMessage::user(prompts::proofread_user_prompt(original_body, draft)),
        ];
        let raw = complete_json(self.llm.as_ref(), messages, PROOFREAD_MAX_TOKENS)
            .await
            .map_err(|e| PortError::ProofreadFailed(e.to_string()))?;

        let reply: ProofreadReply = parse_json_reply(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Unparseable proofread verdict");
            PortError::ProofreadFailed(e.to_string())
        })?;
        Ok(Verdict {
            sendable: reply.send,
            feedback: reply.feedback.trim().to_string(),
        })
    }
}
