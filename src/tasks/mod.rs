//! Background Tasks Module
//!
//! Periodic maintenance tasks that run alongside the pipeline.
//!
//! # Tasks
//! - TTL Cleanup: sweeps expired cache entries at configured intervals

mod cleanup;

pub use cleanup::spawn_cleanup_task;
