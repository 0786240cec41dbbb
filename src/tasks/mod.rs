//! # Task Module
//!
//! Correction tasks: the persisted task table, the in-memory row cache, and
//! the background queue that drains uploaded recordings through the
//! transcription pipeline.
//!
//! ## Key Components:
//! - **Store**: SQLite-backed task rows with a bounded read cache
//! - **Queue**: bounded channel plus worker loop executing correction jobs
//!
//! ## Task Lifecycle:
//! pending → processing → {completed | error}, enforced by guarded single-row
//! updates so a task never regresses. Rows are never deleted.

pub mod queue;
pub mod store;

pub use queue::{CorrectionJob, TaskQueue};
pub use store::{Task, TaskStatus, TaskStore};
