//! Observability setup for weft binaries.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! job of whoever owns the process, through [`tracing_setup::init_tracing`].

pub mod tracing_setup;
