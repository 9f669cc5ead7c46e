//! Shapeshift - asynchronous book conversion worker fleet.
//!
//! Workers pull conversion jobs from a priority-partitioned queue, render a
//! book's content tree page by page into print artifacts with checkpointed
//! progress, merge them, render cover variants, and report job status. A
//! separate backlog signal feeds the fleet autoscaler.

pub mod artifacts;
pub mod backlog;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod content;
pub mod jobs;
pub mod models;
pub mod packaging;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod render;
pub mod utils;
pub mod worker;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
