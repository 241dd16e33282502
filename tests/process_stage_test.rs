//! External process stage tests using small shell scripts
//!
//! Run with: cargo test --test process_stage_test

#![cfg(unix)]

mod fixtures;
mod helpers;

use analysis_worker::models::job::{JobContext, TaskStatus};
use analysis_worker::services::pipeline::{Pipeline, PipelineStep, StageGroup};
use analysis_worker::services::stage::{ProcessStage, Stage, StageError};
use fixtures::*;
use helpers::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

fn shell(name: &str, script: &str, timeout: Duration) -> ProcessStage {
    ProcessStage::new(name, "sh", timeout).with_args(["-c", script])
}

fn context() -> JobContext {
    JobContext {
        task_id: TASK_ID.to_string(),
        company_name: "Acme Corp".to_string(),
        product_paths: vec![PathBuf::from("/tmp/product_images/abc123/a.jpg")],
        competitor_paths: vec![],
    }
}

#[tokio::test]
async fn test_stage_receives_job_in_args_and_environment() {
    let stage = shell(
        "echo_env",
        r#"printf '%s|%s|%s|%s' "$0" "$TASK_ID" "$COMPANY_NAME" "$PRODUCT_IMAGE_PATHS""#,
        Duration::from_secs(5),
    );

    let report = assert_ok!(stage.run(&context()).await);

    assert_eq!(
        report.output,
        r#"Acme Corp|abc123|Acme Corp|["/tmp/product_images/abc123/a.jpg"]"#
    );
}

#[tokio::test]
async fn test_empty_path_list_is_not_exported() {
    let stage = shell(
        "check_env",
        r#"if [ -z "${COMPETITOR_IMAGE_PATHS+set}" ]; then echo unset; else echo set; fi"#,
        Duration::from_secs(5),
    );

    let report = assert_ok!(stage.run(&context()).await);
    assert_eq!(report.output.trim(), "unset");
}

#[tokio::test]
async fn test_nonzero_exit_reports_stderr() {
    let stage = shell(
        "template",
        "echo 'rendering page 1'; echo 'Traceback: missing font' >&2; exit 3",
        Duration::from_secs(5),
    );

    let err = stage.run(&context()).await.unwrap_err();
    assert_eq!(err.stage(), "template");
    assert_eq!(err.reason(), "exit");
    assert_eq!(err.to_string(), "Traceback: missing font");
}

#[tokio::test]
async fn test_nonzero_exit_falls_back_to_stdout() {
    let stage = shell(
        "template",
        "echo 'no input images'; exit 1",
        Duration::from_secs(5),
    );

    let err = stage.run(&context()).await.unwrap_err();
    assert_eq!(err.to_string(), "no input images");
}

#[tokio::test]
async fn test_silent_failure_names_exit_status() {
    let stage = shell("quiet", "exit 7", Duration::from_secs(5));

    let err = stage.run(&context()).await.unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Stage quiet exited with"), "message: {}", message);
    assert!(message.contains('7'));
}

#[tokio::test]
async fn test_stage_is_killed_on_timeout() {
    let stage = shell("stuck", "exec sleep 5", Duration::from_millis(200));

    let started = Instant::now();
    let err = stage.run(&context()).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(matches!(err, StageError::TimedOut { .. }));
    assert_eq!(err.reason(), "timeout");
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_background_child_holding_output_cannot_outlive_timeout() {
    let stage = shell("bg", "sleep 4 & echo started", Duration::from_millis(500));

    let started = Instant::now();
    let err = assert_err!(stage.run(&context()).await);

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "returned after {:?}",
        started.elapsed()
    );
    assert!(matches!(err, StageError::TimedOut { .. }));
}

#[tokio::test]
async fn test_timeout_kills_forked_children() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("late-write");
    let script = format!(
        "(sleep 1; touch '{}') & sleep 5",
        marker.display()
    );
    let stage = shell("forks", &script, Duration::from_millis(300));

    let err = assert_err!(stage.run(&context()).await);
    assert!(matches!(err, StageError::TimedOut { .. }));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "forked child survived the timeout");
}

#[tokio::test]
async fn test_missing_program_is_launch_error() {
    let stage = ProcessStage::new(
        "ghost",
        "/nonexistent/analysis-stage-binary",
        Duration::from_secs(5),
    );

    let err = assert_err!(stage.run(&context()).await);
    assert!(matches!(err, StageError::Launch { .. }));
    assert_eq!(err.reason(), "launch");
}

#[tokio::test]
async fn test_timed_out_stage_fails_job() {
    let harness = Harness::new();
    let job = acme_job();
    seed_inputs(&harness.storage, &job).await;

    let stuck: Arc<dyn Stage> = Arc::new(shell("stuck", "exec sleep 5", Duration::from_millis(200)));
    let pipeline = Pipeline::new(
        vec![StageGroup::sequential(vec![PipelineStep::new(stuck)])],
        Harness::outputs(),
    )
    .with_publish_dir(harness.publish_dir.path());

    let started = Instant::now();
    harness
        .orchestrator(pipeline)
        .process(&job)
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(3));

    let record = harness.status.record(TASK_ID).await.unwrap();
    assert_eq!(record.status, TaskStatus::Error);
    assert!(record.error_message.unwrap().contains("timed out"));
    assert_eq!(record.end_time, None);
}
