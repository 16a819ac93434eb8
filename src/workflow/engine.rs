//! Workflow engine. Walks the triage graph one node at a time over a single
//! owned `RunState`.
//!
//! Per email: `CheckQueueEmpty` → `Categorize` → (`SkipUnrelated` |
//! `ConstructQueries` → `Retrieve` → `Draft` ⇄ `Proofread` → (`Dispatch` |
//! `Escalate`)) → back to `CheckQueueEmpty`. The `Draft` ⇄ `Proofread` loop is
//! only taken while `trials < max_trials`, so every email terminates.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{EventLevel, EventSink, NodeEvent, TracingSink};
use super::node::Node;
use super::state::{Category, EmailOutcome, EmailRecord, Outcome, RunState};
use crate::config::EngineConfig;
use crate::error::{PortError, RunError};
use crate::ports::{Capabilities, DraftRequest};

/// Extra attempts granted to a failed capability call in retrying nodes.
const NODE_RETRIES: u32 = 1;

/// Queries beyond this count are dropped.
const MAX_RAG_QUERIES: usize = 3;

/// Separator between retrieved passages in `retrieved_context`.
const PASSAGE_SEPARATOR: &str = "\n\n";

/// Feedback recorded when the proofreader rejects a draft without saying why.
const DEFAULT_FEEDBACK: &str = "The draft was not sendable. Rewrite it.";

// ── Run status ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Point-in-time view of a run, served by the status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub phase: RunPhase,
    /// Node currently executing (or the last one executed).
    pub node: Node,
    pub queue_remaining: usize,
    pub replied: usize,
    pub skipped: usize,
    pub escalated: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    fn starting(run_id: Uuid) -> Self {
        Self {
            run_id,
            phase: RunPhase::Running,
            node: Node::INITIAL,
            queue_remaining: 0,
            replied: 0,
            skipped: 0,
            escalated: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ── Run context ─────────────────────────────────────────────────────

/// Per-run handle: identity, live status, cancellation, and extra event sinks.
///
/// Cloning shares the same run.
#[derive(Clone)]
pub struct RunContext {
    id: Uuid,
    status: Arc<RwLock<RunStatus>>,
    cancelled: Arc<AtomicBool>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl RunContext {
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            status: Arc::new(RwLock::new(RunStatus::starting(id))),
            cancelled: Arc::new(AtomicBool::new(false)),
            sinks: Vec::new(),
        }
    }

    /// Send this run's events to `sink` as well as the engine's sinks.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. Takes effect before the next node starts;
    /// a capability call already in flight completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> RunStatus {
        self.status.read().await.clone()
    }

    async fn observe(&self, node: Node, state: &RunState) {
        let mut status = self.status.write().await;
        status.node = node;
        status.queue_remaining = state.queue.len();
        status.replied = state.count(Outcome::Replied);
        status.skipped = state.count(Outcome::Skipped);
        status.escalated = state.count(Outcome::Escalated);
    }

    async fn finish(&self, phase: RunPhase) {
        let mut status = self.status.write().await;
        status.phase = phase;
        status.finished_at = Some(Utc::now());
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

// ── Run report ──────────────────────────────────────────────────────

/// Final result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub cancelled: bool,
    /// Nodes visited, in order.
    pub path: Vec<Node>,
    /// Finalized run state. `state.outcomes` holds one entry per processed email.
    pub state: RunState,
}

impl RunReport {
    pub fn outcomes(&self) -> &[EmailOutcome] {
        &self.state.outcomes
    }

    pub fn outcome_of(&self, email_id: &str) -> Option<&EmailOutcome> {
        self.state.outcomes.iter().find(|o| o.email_id == email_id)
    }

    /// How many times `node` was visited.
    pub fn visits(&self, node: Node) -> usize {
        self.path.iter().filter(|n| **n == node).count()
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Stateless between runs: one engine can serve concurrent runs, each with
/// its own `RunState` and `RunContext`.
pub struct WorkflowEngine {
    ports: Capabilities,
    config: EngineConfig,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl WorkflowEngine {
    pub fn new(ports: Capabilities, config: EngineConfig) -> Self {
        Self {
            ports,
            config,
            sinks: vec![Arc::new(TracingSink)],
        }
    }

    /// Add an event sink shared by every run.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run to completion with a fresh context.
    pub async fn run(&self, seed: RunState) -> Result<RunReport, RunError> {
        self.run_with(seed, &RunContext::new()).await
    }

    /// Run to completion (or cancellation) under `ctx`.
    pub async fn run_with(&self, seed: RunState, ctx: &RunContext) -> Result<RunReport, RunError> {
        let mut state = seed;
        let mut node = Node::INITIAL;
        let mut path = Vec::new();

        info!(run_id = %ctx.id(), max_trials = self.config.max_trials, "Workflow started");

        loop {
            if ctx.is_cancelled() {
                requeue_unfinished(&mut state);
                self.emit(
                    ctx,
                    node,
                    EventLevel::Warning,
                    format!(
                        "Workflow cancelled before {node}, {} email(s) left unprocessed",
                        state.queue.len()
                    ),
                );
                ctx.observe(node, &state).await;
                ctx.finish(RunPhase::Cancelled).await;
                return Ok(RunReport {
                    run_id: ctx.id(),
                    cancelled: true,
                    path,
                    state,
                });
            }

            path.push(node);
            ctx.observe(node, &state).await;

            if node.is_terminal() {
                self.emit(
                    ctx,
                    node,
                    EventLevel::Info,
                    format!("Workflow completed, {} email(s) processed", state.outcomes.len()),
                );
                ctx.finish(RunPhase::Completed).await;
                return Ok(RunReport {
                    run_id: ctx.id(),
                    cancelled: false,
                    path,
                    state,
                });
            }

            let next = match self.step(node, &mut state, ctx).await {
                Ok(next) => next,
                Err(e) => {
                    self.emit(ctx, node, EventLevel::Error, e.to_string());
                    ctx.finish(RunPhase::Failed).await;
                    return Err(e);
                }
            };
            debug_assert!(
                node.successors().contains(&next),
                "transition {node} -> {next} is not in the edge table"
            );
            debug!(run_id = %ctx.id(), from = %node, to = %next, "Transition");
            node = next;
        }
    }

    /// Execute one node's action and pick the outgoing edge.
    async fn step(
        &self,
        node: Node,
        state: &mut RunState,
        ctx: &RunContext,
    ) -> Result<Node, RunError> {
        match node {
            Node::LoadInbox => self.load_inbox(state, ctx).await,
            Node::CheckQueueEmpty => Ok(self.check_queue(state, ctx)),
            Node::Categorize => self.categorize(state, ctx).await,
            Node::ConstructQueries => self.construct_queries(state, ctx).await,
            Node::Retrieve => self.retrieve(state, ctx).await,
            Node::Draft => self.draft(state, ctx).await,
            Node::Proofread => self.proofread(state, ctx).await,
            Node::Dispatch => self.dispatch(state, ctx).await,
            Node::SkipUnrelated => {
                state.record_outcome(Outcome::Skipped, None);
                self.emit(ctx, node, EventLevel::Info, "Skipped unrelated email");
                Ok(Node::CheckQueueEmpty)
            }
            Node::Escalate => {
                state.record_outcome(Outcome::Escalated, None);
                self.emit(
                    ctx,
                    node,
                    EventLevel::Warning,
                    format!(
                        "No sendable draft after {} trial(s), escalated for human handling",
                        state.trials
                    ),
                );
                Ok(Node::CheckQueueEmpty)
            }
            Node::End => Ok(Node::End),
        }
    }

    async fn load_inbox(&self, state: &mut RunState, ctx: &RunContext) -> Result<Node, RunError> {
        let node = Node::LoadInbox;
        requeue_unfinished(state);
        self.emit(ctx, node, EventLevel::Info, "Loading inbox emails");

        let inbox = &self.ports.inbox;
        let fetched = self
            .call(node, ctx, || inbox.fetch_unread())
            .await
            .map_err(|e| RunError::SourceUnavailable {
                run_id: ctx.id(),
                reason: e.reason().to_string(),
            })?;

        self.emit(
            ctx,
            node,
            EventLevel::Info,
            format!("Found {} unprocessed emails", fetched.len()),
        );
        state.queue.extend(fetched);
        Ok(Node::CheckQueueEmpty)
    }

    fn check_queue(&self, state: &mut RunState, ctx: &RunContext) -> Node {
        let node = Node::CheckQueueEmpty;
        if !state.pop_next() {
            self.emit(ctx, node, EventLevel::Info, "Inbox empty");
            return Node::End;
        }
        if let Some(email) = &state.current {
            self.emit(
                ctx,
                node,
                EventLevel::Info,
                format!("Processing email: {}", email.subject),
            );
        }
        Node::Categorize
    }

    async fn categorize(&self, state: &mut RunState, ctx: &RunContext) -> Result<Node, RunError> {
        let node = Node::Categorize;
        let email = current(state, node)?;

        let classifier = &self.ports.classifier;
        let classification = match self.call(node, ctx, || classifier.classify(&email.body)).await
        {
            Ok(c) => c,
            Err(e) => return Ok(self.escalate_on_error(state, ctx, node, e)),
        };

        state.category = Some(classification.category);
        state.signatory_count = classification.signatory_count;
        self.emit(
            ctx,
            node,
            EventLevel::Info,
            format!(
                "Categorized as: {} ({} signator{})",
                classification.category,
                classification.signatory_count,
                if classification.signatory_count == 1 { "y" } else { "ies" }
            ),
        );

        if classification.category == Category::Unrelated {
            Ok(Node::SkipUnrelated)
        } else {
            Ok(Node::ConstructQueries)
        }
    }

    async fn construct_queries(
        &self,
        state: &mut RunState,
        ctx: &RunContext,
    ) -> Result<Node, RunError> {
        let node = Node::ConstructQueries;
        let email = current(state, node)?;

        let constructor = &self.ports.queries;
        let body = email.body.as_str();
        let result = self
            .call(node, ctx, move || async move {
                let queries = constructor.construct_queries(body).await?;
                let queries: Vec<String> = queries
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect();
                if queries.is_empty() {
                    return Err(PortError::QueryConstructionFailed(
                        "no queries returned".into(),
                    ));
                }
                Ok(queries)
            })
            .await;

        let mut queries = match result {
            Ok(q) => q,
            Err(e) => return Ok(self.escalate_on_error(state, ctx, node, e)),
        };
        if queries.len() > MAX_RAG_QUERIES {
            warn!(
                email_id = %email.id,
                returned = queries.len(),
                "Query constructor exceeded {MAX_RAG_QUERIES} queries, truncating"
            );
            queries.truncate(MAX_RAG_QUERIES);
        }

        self.emit(
            ctx,
            node,
            EventLevel::Info,
            format!("Constructed {} retrieval queries", queries.len()),
        );
        state.rag_queries = queries;
        Ok(Node::Retrieve)
    }

    async fn retrieve(&self, state: &mut RunState, ctx: &RunContext) -> Result<Node, RunError> {
        let node = Node::Retrieve;
        let retriever = &self.ports.retriever;
        let queries = state.rag_queries.clone();

        let mut seen: Vec<String> = Vec::with_capacity(queries.len());
        let mut passages: Vec<String> = Vec::with_capacity(queries.len());
        for query in &queries {
            let answer = match self.call(node, ctx, || retriever.retrieve(query)).await {
                Ok(a) => a,
                Err(e) => return Ok(self.escalate_on_error(state, ctx, node, e)),
            };
            let answer = answer.trim().to_string();
            if seen.contains(&answer) {
                debug!(query = %query, "Duplicate passage dropped");
                continue;
            }
            passages.push(format!("{query}\n{answer}"));
            seen.push(answer);
        }

        state.retrieved_context = passages.join(PASSAGE_SEPARATOR);
        self.emit(
            ctx,
            node,
            EventLevel::Info,
            format!(
                "Retrieved {} passage(s) for {} query(ies)",
                passages.len(),
                queries.len()
            ),
        );
        Ok(Node::Draft)
    }

    async fn draft(&self, state: &mut RunState, ctx: &RunContext) -> Result<Node, RunError> {
        let node = Node::Draft;
        let email = current(state, node)?;
        let category = state.category.ok_or_else(|| RunError::InvalidState {
            node: node.to_string(),
            reason: "email has not been categorized".into(),
        })?;

        let drafter = &self.ports.drafter;
        let request = DraftRequest {
            email: &email,
            category,
            signatory_count: state.signatory_count,
            context: &state.retrieved_context,
            history: state.draft_history.turns(),
        };
        let result = self.call(node, ctx, || drafter.draft(request)).await;

        let draft = match result {
            Ok(d) => d,
            Err(e) => return Ok(self.escalate_on_error(state, ctx, node, e)),
        };

        state.draft_history.push_draft(draft.clone());
        state.draft = draft;
        state.trials += 1;
        self.emit(
            ctx,
            node,
            EventLevel::Info,
            format!(
                "Generated draft {} of {} for {}",
                state.trials, self.config.max_trials, email.id
            ),
        );
        Ok(Node::Proofread)
    }

    async fn proofread(&self, state: &mut RunState, ctx: &RunContext) -> Result<Node, RunError> {
        let node = Node::Proofread;
        let email = current(state, node)?;

        let proofreader = &self.ports.proofreader;
        let draft = state.draft.clone();
        let verdict = match self
            .call(node, ctx, || proofreader.proofread(&email.body, &draft))
            .await
        {
            Ok(v) => v,
            Err(e) => return Ok(self.escalate_on_error(state, ctx, node, e)),
        };

        state.sendable = verdict.sendable;
        if verdict.sendable {
            self.emit(ctx, node, EventLevel::Info, "Draft approved by proofreader");
            return Ok(Node::Dispatch);
        }

        let feedback = if verdict.feedback.trim().is_empty() {
            DEFAULT_FEEDBACK.to_string()
        } else {
            verdict.feedback
        };
        self.emit(
            ctx,
            node,
            EventLevel::Warning,
            format!("Draft rejected: {feedback}"),
        );
        state.draft_history.push_feedback(feedback);

        if state.trials < self.config.max_trials {
            Ok(Node::Draft)
        } else {
            Ok(Node::Escalate)
        }
    }

    async fn dispatch(&self, state: &mut RunState, ctx: &RunContext) -> Result<Node, RunError> {
        let node = Node::Dispatch;
        let email = current(state, node)?;

        let dispatcher = &self.ports.dispatcher;
        let draft = state.draft.clone();
        if let Err(e) = self.call(node, ctx, || dispatcher.dispatch(&email, &draft)).await {
            return Ok(self.escalate_on_error(state, ctx, node, e));
        }

        state.record_outcome(Outcome::Replied, None);
        self.emit(
            ctx,
            node,
            EventLevel::Info,
            format!("Generated response for {}", email.id),
        );
        Ok(Node::CheckQueueEmpty)
    }

    /// Run one capability call under the configured timeout, retrying once
    /// in nodes whose failures are retryable.
    async fn call<T, F, Fut>(&self, node: Node, ctx: &RunContext, mut op: F) -> Result<T, PortError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PortError>>,
    {
        let attempts = if node.retries_on_failure() {
            1 + NODE_RETRIES
        } else {
            1
        };
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(self.config.call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => timed_out(node, self.config.call_timeout),
            };
            if attempt >= attempts {
                return Err(err);
            }
            self.emit(
                ctx,
                node,
                EventLevel::Warning,
                format!("{err}; retrying (attempt {} of {attempts})", attempt + 1),
            );
            attempt += 1;
        }
    }

    /// Escalate the current email after a persistent failure and move on.
    fn escalate_on_error(
        &self,
        state: &mut RunState,
        ctx: &RunContext,
        node: Node,
        err: PortError,
    ) -> Node {
        let email_id = state
            .current
            .as_ref()
            .map(|e| e.id.clone())
            .unwrap_or_default();
        self.emit(
            ctx,
            node,
            EventLevel::Error,
            format!("{err}; escalating email {email_id}"),
        );
        state.record_outcome(
            Outcome::Escalated,
            Some((err.kind().to_string(), err.reason().to_string())),
        );
        Node::CheckQueueEmpty
    }

    fn emit(&self, ctx: &RunContext, node: Node, level: EventLevel, message: impl Into<String>) {
        let event = NodeEvent::new(ctx.id(), node, level, message);
        for sink in self.sinks.iter().chain(ctx.sinks.iter()) {
            sink.emit(&event);
        }
    }
}

/// Clone of the email being processed, or an invalid-state error.
fn current(state: &RunState, node: Node) -> Result<EmailRecord, RunError> {
    state.current.clone().ok_or_else(|| RunError::InvalidState {
        node: node.to_string(),
        reason: "no current email".into(),
    })
}

/// Put an unfinished `current` back at the front of the queue so it is
/// neither lost nor counted twice.
fn requeue_unfinished(state: &mut RunState) {
    if !state.current_is_finished() {
        if let Some(email) = state.current.take() {
            state.queue.push_front(email);
        }
    }
}

fn timed_out(node: Node, timeout: std::time::Duration) -> PortError {
    let reason = format!("timed out after {timeout:?}");
    match node {
        Node::LoadInbox => PortError::SourceUnavailable(reason),
        Node::Categorize => PortError::ClassificationFailed(reason),
        Node::ConstructQueries => PortError::QueryConstructionFailed(reason),
        Node::Retrieve => PortError::RetrievalFailed(reason),
        Node::Draft => PortError::DraftFailed(reason),
        Node::Proofread => PortError::ProofreadFailed(reason),
        _ => PortError::DispatchFailed(reason),
    }
}
