//! Shared domain types for weft.
//!
//! This crate contains the workflow data model used across the workspace:
//! definitions (what to run), execution state (what happened), engine
//! configuration, and engine events.
//!
//! Zero infrastructure dependencies -- only serde and chrono.

pub mod config;
pub mod event;
pub mod execution;
pub mod workflow;
