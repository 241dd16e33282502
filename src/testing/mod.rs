//! In-memory test doubles for the worker's external dependencies.
//!
//! These let the orchestrator and consumer be exercised end to end without
//! Redis, PostgreSQL, S3 or real stage executables.

mod memory_queue;
mod memory_status;
mod memory_storage;
mod scripted_stage;

pub use memory_queue::MemoryQueue;
pub use memory_status::MemoryStatusStore;
pub use memory_storage::MemoryArtifactStore;
pub use scripted_stage::{ScriptedStage, StageInvocation, StageLog};
