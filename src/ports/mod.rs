//! Capability ports consumed by the workflow engine.
//!
//! Each port is a black box: text in, structured output out. The engine never
//! looks inside. Concrete backends:
//! - `mail`: IMAP inbox source, SMTP / IMAP-draft dispatcher
//! - `agents`: LLM-backed classifier, query constructor, drafter, proofreader,
//!   knowledge-base retriever
//! - `scripted`: deterministic doubles for tests

pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PortError;
use crate::workflow::state::{Category, EmailRecord, Turn};

/// Classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub signatory_count: u32,
}

/// Proofreader output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub sendable: bool,
    #[serde(default)]
    pub feedback: String,
}

/// Inputs handed to the drafter.
#[derive(Debug, Clone, Copy)]
pub struct DraftRequest<'a> {
    pub email: &'a EmailRecord,
    pub category: Category,
    pub signatory_count: u32,
    pub context: &'a str,
    /// Earlier drafts and proofreader feedback, oldest first.
    pub history: &'a [Turn],
}

/// Source of unread emails.
#[async_trait]
pub trait InboxSource: Send + Sync {
    async fn fetch_unread(&self) -> Result<Vec<EmailRecord>, PortError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, body: &str) -> Result<Classification, PortError>;
}

/// Builds between one and three retrieval queries from an email body.
#[async_trait]
pub trait QueryConstructor: Send + Sync {
    async fn construct_queries(&self, body: &str) -> Result<Vec<String>, PortError>;
}

/// Answers one query from the document index. May answer "I don't know."
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<String, PortError>;
}

#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, PortError>;
}

#[async_trait]
pub trait Proofreader: Send + Sync {
    async fn proofread(&self, original_body: &str, draft: &str) -> Result<Verdict, PortError>;
}

/// Sends the reply or creates it as a draft. Not compensable.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, email: &EmailRecord, draft: &str) -> Result<(), PortError>;
}

/// The full set of backends one engine runs against.
#[derive(Clone)]
pub struct Capabilities {
    pub inbox: Arc<dyn InboxSource>,
    pub classifier: Arc<dyn Classifier>,
    pub queries: Arc<dyn QueryConstructor>,
    pub retriever: Arc<dyn Retriever>,
    pub drafter: Arc<dyn Drafter>,
    pub proofreader: Arc<dyn Proofreader>,
    pub dispatcher: Arc<dyn Dispatcher>,
}
