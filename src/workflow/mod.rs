//! The triage workflow: run state, graph, events, and the engine that walks it.

pub mod engine;
pub mod events;
pub mod node;
pub mod state;

pub use engine::{RunContext, RunPhase, RunReport, RunStatus, WorkflowEngine};
pub use events::{ChannelSink, EventLevel, EventSink, NodeEvent, TracingSink};
pub use node::{GraphDescription, Node};
pub use state::{
    Category, DraftHistory, EmailOutcome, EmailRecord, Outcome, Role, RunState, Turn,
};
