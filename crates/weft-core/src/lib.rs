//! Workflow engine for weft.
//!
//! This crate holds everything that runs a workflow: definition loading and
//! validation, the DAG scheduler, per-task execution with retries, the
//! function registry, and the `WorkflowEngine` facade that owns them. External
//! services are reached only through the `AgentInvoker` and `ToolInvoker`
//! traits, so this crate never depends on a transport.

pub mod engine;
pub mod event;
pub mod workflow;

pub use engine::{EngineError, WorkflowEngine, WorkflowEngineBuilder};
