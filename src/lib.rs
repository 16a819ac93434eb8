//! Inbox triage: a bounded-retry workflow that categorizes support email,
//! drafts and proofreads replies, and dispatches or escalates each one.

pub mod agents;
pub mod app;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod ports;
pub mod server;
pub mod trigger;
pub mod workflow;
