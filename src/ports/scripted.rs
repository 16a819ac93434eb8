//! Deterministic port backends returning fixed outputs.
//!
//! Every double counts its calls and can be told to fail its next N calls,
//! which is enough to drive the engine through every route without any
//! model or mailbox behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    Capabilities, Classification, Classifier, Dispatcher, DraftRequest, Drafter, InboxSource,
    Proofreader, QueryConstructor, Retriever, Verdict,
};
use crate::error::PortError;
use crate::workflow::state::{Category, EmailRecord};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Call counter with failure injection.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl CallLog {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Count a call; returns `true` when this call must fail.
    fn enter(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

// ── Inbox ───────────────────────────────────────────────────────────

/// Hands out its emails once, like a mailbox marking them read.
#[derive(Debug, Default)]
pub struct ScriptedInbox {
    emails: Mutex<Vec<EmailRecord>>,
    pub log: CallLog,
}

impl ScriptedInbox {
    pub fn new(emails: Vec<EmailRecord>) -> Self {
        Self {
            emails: Mutex::new(emails),
            log: CallLog::default(),
        }
    }

    pub fn push(&self, email: EmailRecord) {
        lock(&self.emails).push(email);
    }
}

#[async_trait]
impl InboxSource for ScriptedInbox {
    async fn fetch_unread(&self) -> Result<Vec<EmailRecord>, PortError> {
        if self.log.enter() {
            return Err(PortError::SourceUnavailable("scripted outage".into()));
        }
        Ok(std::mem::take(&mut *lock(&self.emails)))
    }
}

// ── Classifier ──────────────────────────────────────────────────────

/// Classifies by exact body match, falling back to a default.
#[derive(Debug)]
pub struct ScriptedClassifier {
    default: Classification,
    by_body: HashMap<String, Classification>,
    pub log: CallLog,
}

impl ScriptedClassifier {
    pub fn new(category: Category, signatory_count: u32) -> Self {
        Self {
            default: Classification {
                category,
                signatory_count,
            },
            by_body: HashMap::new(),
            log: CallLog::default(),
        }
    }

    pub fn with_body(
        mut self,
        body: impl Into<String>,
        category: Category,
        signatory_count: u32,
    ) -> Self {
        self.by_body.insert(
            body.into(),
            Classification {
                category,
                signatory_count,
            },
        );
        self
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, body: &str) -> Result<Classification, PortError> {
        if self.log.enter() {
            return Err(PortError::ClassificationFailed(
                "scripted malformed output".into(),
            ));
        }
        Ok(self.by_body.get(body).copied().unwrap_or(self.default))
    }
}

// ── Query constructor ───────────────────────────────────────────────

#[derive(Debug)]
pub struct ScriptedQueries {
    queries: Vec<String>,
    pub log: CallLog,
}

impl ScriptedQueries {
    pub fn new<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queries: queries.into_iter().map(Into::into).collect(),
            log: CallLog::default(),
        }
    }
}

#[async_trait]
impl QueryConstructor for ScriptedQueries {
    async fn construct_queries(&self, _body: &str) -> Result<Vec<String>, PortError> {
        if self.log.enter() {
            return Err(PortError::QueryConstructionFailed(
                "scripted malformed output".into(),
            ));
        }
        Ok(self.queries.clone())
    }
}

// ── Retriever ───────────────────────────────────────────────────────

/// Answers per query, or with a default answer.
#[derive(Debug)]
pub struct ScriptedRetriever {
    default: String,
    answers: HashMap<String, String>,
    pub log: CallLog,
}

impl ScriptedRetriever {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            answers: HashMap::new(),
            log: CallLog::default(),
        }
    }

    pub fn with_answer(mut self, query: impl Into<String>, answer: impl Into<String>) -> Self {
        self.answers.insert(query.into(), answer.into());
        self
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn retrieve(&self, query: &str) -> Result<String, PortError> {
        if self.log.enter() {
            return Err(PortError::RetrievalFailed("scripted index outage".into()));
        }
        Ok(self
            .answers
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

// ── Drafter ─────────────────────────────────────────────────────────

/// Writes numbered drafts and remembers how much history each call saw.
#[derive(Debug, Default)]
pub struct ScriptedDrafter {
    history_lengths: Mutex<Vec<usize>>,
    contexts: Mutex<Vec<String>>,
    pub log: CallLog,
}

impl ScriptedDrafter {
    pub fn new() -> Self {
        Self::default()
    }

    /// History length handed to each successful call, in order.
    pub fn history_lengths(&self) -> Vec<usize> {
        lock(&self.history_lengths).clone()
    }

    /// Retrieved context handed to each successful call, in order.
    pub fn contexts(&self) -> Vec<String> {
        lock(&self.contexts).clone()
    }
}

#[async_trait]
impl Drafter for ScriptedDrafter {
    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, PortError> {
        if self.log.enter() {
            return Err(PortError::DraftFailed("scripted malformed output".into()));
        }
        lock(&self.history_lengths).push(request.history.len());
        lock(&self.contexts).push(request.context.to_string());
        let attempt = request
            .history
            .iter()
            .filter(|t| t.role == crate::workflow::state::Role::Assistant)
            .count()
            + 1;
        Ok(format!(
            "Dear Customer,\n\nDraft {attempt} for {} ({} signatories).\n\nBest regards,\nSupport",
            request.category, request.signatory_count
        ))
    }
}

// ── Proofreader ─────────────────────────────────────────────────────

/// Returns scripted verdicts in order, repeating the last one.
#[derive(Debug)]
pub struct ScriptedProofreader {
    verdicts: Vec<Verdict>,
    next: AtomicUsize,
    pub log: CallLog,
}

impl ScriptedProofreader {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts,
            next: AtomicUsize::new(0),
            log: CallLog::default(),
        }
    }

    pub fn always_sendable() -> Self {
        Self::new(vec![Verdict {
            sendable: true,
            feedback: String::new(),
        }])
    }

    pub fn never_sendable(feedback: impl Into<String>) -> Self {
        Self::new(vec![Verdict {
            sendable: false,
            feedback: feedback.into(),
        }])
    }
}

#[async_trait]
impl Proofreader for ScriptedProofreader {
    async fn proofread(&self, _original_body: &str, _draft: &str) -> Result<Verdict, PortError> {
        if self.log.enter() {
            return Err(PortError::ProofreadFailed("scripted malformed output".into()));
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .verdicts
            .get(index)
            .or_else(|| self.verdicts.last())
            .cloned()
            .unwrap_or(Verdict {
                sendable: true,
                feedback: String::new(),
            });
        Ok(verdict)
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Records every `(email id, draft)` it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, String)>>,
    pub log: CallLog,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, email: &EmailRecord, draft: &str) -> Result<(), PortError> {
        if self.log.enter() {
            return Err(PortError::DispatchFailed("scripted SMTP rejection".into()));
        }
        lock(&self.sent).push((email.id.clone(), draft.to_string()));
        Ok(())
    }
}

// ── Bundle ──────────────────────────────────────────────────────────

/// Scripted backends for every port, kept as concrete types so tests can
/// inspect counters after a run.
pub struct Scripted {
    pub inbox: Arc<ScriptedInbox>,
    pub classifier: Arc<ScriptedClassifier>,
    pub queries: Arc<ScriptedQueries>,
    pub retriever: Arc<ScriptedRetriever>,
    pub drafter: Arc<ScriptedDrafter>,
    pub proofreader: Arc<ScriptedProofreader>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl Scripted {
    /// Every email classified as `category`, one query, a fixed answer, and
    /// a proofreader that accepts the first draft.
    pub fn new(emails: Vec<EmailRecord>, category: Category, signatory_count: u32) -> Self {
        Self {
            inbox: Arc::new(ScriptedInbox::new(emails)),
            classifier: Arc::new(ScriptedClassifier::new(category, signatory_count)),
            queries: Arc::new(ScriptedQueries::new(["What is the instruction?"])),
            retriever: Arc::new(ScriptedRetriever::new("The instruction has been noted.")),
            drafter: Arc::new(ScriptedDrafter::new()),
            proofreader: Arc::new(ScriptedProofreader::always_sendable()),
            dispatcher: Arc::new(RecordingDispatcher::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: ScriptedClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_queries(mut self, queries: ScriptedQueries) -> Self {
        self.queries = Arc::new(queries);
        self
    }

    pub fn with_retriever(mut self, retriever: ScriptedRetriever) -> Self {
        self.retriever = Arc::new(retriever);
        self
    }

    pub fn with_proofreader(mut self, proofreader: ScriptedProofreader) -> Self {
        self.proofreader = Arc::new(proofreader);
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            inbox: self.inbox.clone(),
            classifier: self.classifier.clone(),
            queries: self.queries.clone(),
            retriever: self.retriever.clone(),
            drafter: self.drafter.clone(),
            proofreader: self.proofreader.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_log_fails_exactly_n_times() {
        let log = CallLog::default();
        log.fail_next(2);
        assert!(log.enter());
        assert!(log.enter());
        assert!(!log.enter());
        assert_eq!(log.calls(), 3);
    }

    #[tokio::test]
    async fn inbox_hands_out_emails_once() {
        let inbox = ScriptedInbox::new(vec![EmailRecord {
            id: "1".into(),
            ..Default::default()
        }]);
        assert_eq!(inbox.fetch_unread().await.unwrap().len(), 1);
        assert!(inbox.fetch_unread().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn proofreader_repeats_last_verdict() {
        let proofreader = ScriptedProofreader::new(vec![
            Verdict {
                sendable: false,
                feedback: "tone".into(),
            },
            Verdict {
                sendable: true,
                feedback: String::new(),
            },
        ]);
        assert!(!proofreader.proofread("b", "d").await.unwrap().sendable);
        assert!(proofreader.proofread("b", "d").await.unwrap().sendable);
        assert!(proofreader.proofread("b", "d").await.unwrap().sendable);
    }

    #[tokio::test]
    async fn classifier_matches_body_then_default() {
        let classifier = ScriptedClassifier::new(Category::MaturityRepayment, 1).with_body(
            "newsletter",
            Category::Unrelated,
            0,
        );
        let hit = classifier.classify("newsletter").await.unwrap();
        assert_eq!(hit.category, Category::Unrelated);
        let miss = classifier.classify("repay please").await.unwrap();
        assert_eq!(miss.category, Category::MaturityRepayment);
    }
}
