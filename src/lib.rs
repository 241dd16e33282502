//! Analysis job worker
//!
//! This library provides the job-processing core of the analysis system:
//! it consumes job messages from a Redis work queue, stages input images
//! from S3-compatible storage, runs the stage pipeline as external
//! processes, verifies the published reports and records each task's
//! lifecycle in a PostgreSQL status table.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
