//! Run-state model: the email record, classification labels, draft
//! conversation memory, and the mutable record threaded through every node.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Email record ────────────────────────────────────────────────────

/// Immutable facts about one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailRecord {
    /// Mailbox-native identifier (IMAP UID or provider id).
    pub id: String,
    /// Conversation thread identifier.
    pub thread_id: String,
    /// `Message-ID` header.
    pub message_id: String,
    /// `References` header, space separated.
    pub references: String,
    /// Sender address.
    pub sender: String,
    pub subject: String,
    pub body: String,
}

// ── Category ────────────────────────────────────────────────────────

/// Classification label assigned to an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MaturityReinvestment,
    MaturityRepayment,
    RefixInterestRate,
    FloatingInterestRate,
    ChangeContactDetails,
    Unrelated,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::MaturityReinvestment,
        Self::MaturityRepayment,
        Self::RefixInterestRate,
        Self::FloatingInterestRate,
        Self::ChangeContactDetails,
        Self::Unrelated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaturityReinvestment => "maturity_reinvestment",
            Self::MaturityRepayment => "maturity_repayment",
            Self::RefixInterestRate => "refix_interest_rate",
            Self::FloatingInterestRate => "floating_interest_rate",
            Self::ChangeContactDetails => "change_contact_details",
            Self::Unrelated => "unrelated",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown category: '{s}'"))
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Terminal status of one email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A sendable draft was dispatched.
    Replied,
    /// Classified as unrelated; no draft was produced.
    Skipped,
    /// Needs a human: no sendable draft within the trial bound, or a
    /// capability kept failing.
    Escalated,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Replied => "replied",
            Self::Skipped => "skipped",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Per-email result recorded when an email reaches a terminal node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailOutcome {
    pub email_id: String,
    pub sender: String,
    pub subject: String,
    pub category: Option<Category>,
    pub outcome: Outcome,
    /// Draft attempts made for this email.
    pub trials: u32,
    /// Final draft text. Present for `replied`, and for `escalated` when a
    /// draft had been produced before escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    /// Failure kind (e.g. `retrieval_failed`) when escalated on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure detail accompanying `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

// ── Draft history ───────────────────────────────────────────────────

/// Who produced a turn in the draft conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A draft written by the drafter.
    Assistant,
    /// Proofreader feedback on the previous draft.
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Append-only draft/feedback memory for the current email.
///
/// Only the engine clears it, and only when a new email is popped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftHistory {
    turns: Vec<Turn>,
}

impl DraftHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_draft(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn push_feedback(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of drafts (assistant turns) recorded.
    pub fn draft_count(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::Assistant).count()
    }

    pub(crate) fn reset(&mut self) {
        self.turns.clear();
    }
}

// ── Run state ───────────────────────────────────────────────────────

/// The single mutable record threaded through one engine execution.
///
/// Every field defaults, so a seed can be as small as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    /// Emails waiting to be processed, front first.
    pub queue: VecDeque<EmailRecord>,
    /// Email currently being processed.
    pub current: Option<EmailRecord>,
    /// Set once `current` has a recorded outcome; cleared on the next pop.
    pub current_finished: bool,
    pub category: Option<Category>,
    pub signatory_count: u32,
    /// Up to three retrieval queries for the current email.
    pub rag_queries: Vec<String>,
    pub retrieved_context: String,
    pub draft_history: DraftHistory,
    /// Current candidate reply.
    pub draft: String,
    /// Latest proofreader verdict. Meaningless before the first proofread.
    pub sendable: bool,
    /// Draft attempts made for the current email.
    pub trials: u32,
    /// Terminal outcomes, in processing order.
    pub outcomes: Vec<EmailOutcome>,
}

impl RunState {
    /// Seed state with a pre-filled queue.
    pub fn with_queue(emails: impl IntoIterator<Item = EmailRecord>) -> Self {
        Self {
            queue: emails.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Pop the next email into `current`, resetting every per-email field.
    /// Returns `false` when the queue is empty.
    pub(crate) fn pop_next(&mut self) -> bool {
        let Some(next) = self.queue.pop_front() else {
            self.current = None;
            self.current_finished = false;
            return false;
        };
        self.current = Some(next);
        self.current_finished = false;
        self.category = None;
        self.signatory_count = 0;
        self.rag_queries.clear();
        self.retrieved_context.clear();
        self.draft_history.reset();
        self.draft.clear();
        self.sendable = false;
        self.trials = 0;
        true
    }

    /// Record the terminal outcome of `current`.
    pub(crate) fn record_outcome(&mut self, outcome: Outcome, error: Option<(String, String)>) {
        let Some(email) = self.current.as_ref() else {
            return;
        };
        let draft = match outcome {
            Outcome::Skipped => None,
            Outcome::Replied | Outcome::Escalated if self.draft.is_empty() => None,
            Outcome::Replied | Outcome::Escalated => Some(self.draft.clone()),
        };
        let (error, error_detail) = match error {
            Some((kind, detail)) => (Some(kind), Some(detail)),
            None => (None, None),
        };
        self.outcomes.push(EmailOutcome {
            email_id: email.id.clone(),
            sender: email.sender.clone(),
            subject: email.subject.clone(),
            category: self.category,
            outcome,
            trials: self.trials,
            draft,
            error,
            error_detail,
        });
        self.current_finished = true;
    }

    /// Whether `current` already has an outcome recorded.
    pub fn current_is_finished(&self) -> bool {
        self.current.is_some() && self.current_finished
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|o| o.outcome == outcome).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(id: &str) -> EmailRecord {
        EmailRecord {
            id: id.into(),
            sender: format!("{id}@example.com"),
            subject: "Term deposit".into(),
            body: "Please reinvest on maturity".into(),
            ..Default::default()
        }
    }

    #[test]
    fn category_parse_roundtrip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert_eq!(
            " Refix_Interest_Rate ".parse::<Category>().unwrap(),
            Category::RefixInterestRate
        );
        assert!("pricing".parse::<Category>().is_err());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::ChangeContactDetails).unwrap();
        assert_eq!(json, "\"change_contact_details\"");
    }

    #[test]
    fn pop_next_resets_per_email_fields() {
        let mut state = RunState::with_queue([email("a"), email("b")]);
        assert!(state.pop_next());
        state.trials = 2;
        state.draft = "draft".into();
        state.sendable = true;
        state.category = Some(Category::MaturityRepayment);
        state.draft_history.push_draft("draft");
        state.draft_history.push_feedback("too long");

        assert!(state.pop_next());
        assert_eq!(state.current.as_ref().unwrap().id, "b");
        assert_eq!(state.trials, 0);
        assert!(state.draft_history.is_empty());
        assert!(state.draft.is_empty());
        assert!(!state.sendable);
        assert!(state.category.is_none());
    }

    #[test]
    fn pop_next_on_empty_queue_clears_current() {
        let mut state = RunState::with_queue([email("a")]);
        assert!(state.pop_next());
        assert!(!state.pop_next());
        assert!(state.current.is_none());
    }

    #[test]
    fn record_outcome_keeps_draft_for_escalation() {
        let mut state = RunState::with_queue([email("a")]);
        state.pop_next();
        state.trials = 2;
        state.draft = "Dear Customer".into();
        state.record_outcome(Outcome::Escalated, None);

        let recorded = &state.outcomes[0];
        assert_eq!(recorded.outcome, Outcome::Escalated);
        assert_eq!(recorded.draft.as_deref(), Some("Dear Customer"));
        assert_eq!(recorded.trials, 2);
        assert!(state.current_is_finished());
    }

    #[test]
    fn finished_flag_tracks_current_not_its_id() {
        // Seeded emails posted as `{}` all share the empty id.
        let mut state = RunState::with_queue([email(""), email("")]);
        assert!(state.pop_next());
        state.record_outcome(Outcome::Replied, None);
        assert!(state.current_is_finished());

        assert!(state.pop_next());
        assert!(!state.current_is_finished());
        state.record_outcome(Outcome::Skipped, None);
        assert!(state.current_is_finished());

        assert!(!state.pop_next());
        assert!(!state.current_is_finished());
    }

    #[test]
    fn record_outcome_skipped_has_no_draft() {
        let mut state = RunState::with_queue([email("a")]);
        state.pop_next();
        state.category = Some(Category::Unrelated);
        state.record_outcome(Outcome::Skipped, None);
        assert!(state.outcomes[0].draft.is_none());
        assert_eq!(state.count(Outcome::Skipped), 1);
    }

    #[test]
    fn record_outcome_with_error_detail() {
        let mut state = RunState::with_queue([email("a")]);
        state.pop_next();
        state.record_outcome(
            Outcome::Escalated,
            Some(("retrieval_failed".into(), "index offline".into())),
        );
        let recorded = &state.outcomes[0];
        assert_eq!(recorded.error.as_deref(), Some("retrieval_failed"));
        assert_eq!(recorded.error_detail.as_deref(), Some("index offline"));
    }

    #[test]
    fn draft_history_counts_turns() {
        let mut history = DraftHistory::new();
        history.push_draft("v1");
        history.push_feedback("fix tone");
        history.push_draft("v2");
        assert_eq!(history.len(), 3);
        assert_eq!(history.draft_count(), 2);
        assert_eq!(history.turns()[1].role, Role::User);
    }

    #[test]
    fn run_state_deserializes_from_empty_object() {
        let state: RunState = serde_json::from_str("{}").unwrap();
        assert!(state.queue.is_empty());
        assert!(state.current.is_none());
        assert_eq!(state.trials, 0);
    }

    #[test]
    fn draft_history_serializes_as_list() {
        let mut history = DraftHistory::new();
        history.push_draft("hello");
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json[0]["role"], "assistant");
        assert_eq!(json[0]["content"], "hello");
    }
}
