//! Execution machinery for litani runs: the per-job wrapper and its memory
//! profiler, the outcome decider, the Ninja materializer and driver, the
//! run aggregator, the report publisher, and the dump-run snapshot
//! protocol.

#![recursion_limit = "256"]

pub mod aggregate;
pub mod artifact;
pub mod driver;
pub mod graph;
pub mod ninja;
pub mod outcome;
pub mod profiler;
pub mod report;
pub mod snapshot;
pub mod validate;
pub mod wrapper;
