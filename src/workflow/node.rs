//! Workflow graph: nodes and the static edge table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A step in the triage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    LoadInbox,
    CheckQueueEmpty,
    Categorize,
    ConstructQueries,
    Retrieve,
    Draft,
    Proofread,
    Dispatch,
    SkipUnrelated,
    Escalate,
    End,
}

impl Node {
    pub const INITIAL: Node = Node::LoadInbox;

    pub const ALL: [Node; 11] = [
        Self::LoadInbox,
        Self::CheckQueueEmpty,
        Self::Categorize,
        Self::ConstructQueries,
        Self::Retrieve,
        Self::Draft,
        Self::Proofread,
        Self::Dispatch,
        Self::SkipUnrelated,
        Self::Escalate,
        Self::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadInbox => "load_inbox",
            Self::CheckQueueEmpty => "check_queue_empty",
            Self::Categorize => "categorize",
            Self::ConstructQueries => "construct_queries",
            Self::Retrieve => "retrieve",
            Self::Draft => "draft",
            Self::Proofread => "proofread",
            Self::Dispatch => "dispatch",
            Self::SkipUnrelated => "skip_unrelated",
            Self::Escalate => "escalate",
            Self::End => "end",
        }
    }

    /// Every node this node may route to.
    ///
    /// `Categorize` through `Proofread` and `Dispatch` may also reach
    /// `CheckQueueEmpty` directly when a capability failure escalates the
    /// current email.
    pub fn successors(&self) -> &'static [Node] {
        use Node::*;
        match self {
            LoadInbox => &[CheckQueueEmpty],
            CheckQueueEmpty => &[End, Categorize],
            Categorize => &[SkipUnrelated, ConstructQueries, CheckQueueEmpty],
            ConstructQueries => &[Retrieve, CheckQueueEmpty],
            Retrieve => &[Draft, CheckQueueEmpty],
            Draft => &[Proofread, CheckQueueEmpty],
            Proofread => &[Dispatch, Draft, Escalate, CheckQueueEmpty],
            Dispatch => &[CheckQueueEmpty],
            SkipUnrelated => &[CheckQueueEmpty],
            Escalate => &[CheckQueueEmpty],
            End => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Whether a failed capability call in this node is retried once.
    pub fn retries_on_failure(&self) -> bool {
        matches!(
            self,
            Self::Categorize
                | Self::ConstructQueries
                | Self::Retrieve
                | Self::Draft
                | Self::Proofread
        )
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of the graph, for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct GraphDescription {
    pub initial: Node,
    pub nodes: Vec<Node>,
    pub edges: Vec<(Node, Node)>,
}

pub fn describe() -> GraphDescription {
    let edges = Node::ALL
        .iter()
        .flat_map(|from| from.successors().iter().map(move |to| (*from, *to)))
        .collect();
    GraphDescription {
        initial: Node::INITIAL,
        nodes: Node::ALL.to_vec(),
        edges,
    }
}
