//! Workflow engine core: definitions, scheduling, and task execution.
//!
//! - `definition` -- YAML/JSON parsing, validation, filesystem load/save
//! - `registry` -- In-memory workflow definition registry
//! - `dag` -- Cycle detection and the static execution plan
//! - `context` -- Shared execution state and variable snapshots
//! - `resolver` -- `${var}` parameter substitution
//! - `condition` -- Condition evaluation against runtime variables
//! - `retry` -- Attempt counting and exponential backoff
//! - `invoker` -- Agent and tool invoker traits
//! - `functions` -- Host function registry
//! - `step_runner` -- Per-type task executors
//! - `runner` -- Single-task attempt loop with retries
//! - `executor` -- Ready-set DAG executor with bounded concurrency
//! - `manager` -- Execution lifecycle: start, query, cancel, wait, evict
//! - `monitor` -- Periodic sweep of finished executions

pub mod condition;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod functions;
pub mod invoker;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod runner;
pub mod step_runner;
