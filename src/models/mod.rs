pub mod job;
pub mod pipeline;
pub mod status;
