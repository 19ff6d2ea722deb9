//! Runtime glue shared by every stage: configuration, tool resolution,
//! per-kernel log capture, timed tasks, and telemetry.

pub mod config;
pub mod locator;
pub mod log;
pub mod task;
pub mod telemetry;
