pub mod consumer;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod stage;
pub mod status;
pub mod storage;
pub mod workspace;
