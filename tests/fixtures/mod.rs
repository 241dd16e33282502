//! Job fixtures shared by the integration tests

#![allow(dead_code)]

use analysis_worker::models::job::JobMessage;
use analysis_worker::testing::MemoryArtifactStore;

pub const TASK_ID: &str = "abc123";
pub const PRODUCT_KEY: &str = "p/abc123/a.jpg";
pub const COMPETITOR_KEY: &str = "c/abc123/b.jpg";

/// Report keys the analysis pipeline publishes for `TASK_ID`.
pub const REPORT_KEYS: [(&str, &str); 4] = [
    ("brand_marketing", "reports/abc123/pdfs/brand_marketing.pdf"),
    ("content_marketing", "reports/abc123/pdfs/content_marketing.pdf"),
    ("final_report", "reports/abc123/final_report.pdf"),
    ("social_media_marketing", "reports/abc123/pdfs/social_media_marketing.pdf"),
];

/// The canonical single-image job.
pub fn acme_job() -> JobMessage {
    JobMessage {
        task_id: TASK_ID.to_string(),
        company_name: "Acme".to_string(),
        product_images: vec![PRODUCT_KEY.to_string()],
        competitor_images: vec![COMPETITOR_KEY.to_string()],
    }
}

pub fn job_body(job: &JobMessage) -> String {
    serde_json::to_string(job).expect("job serializes")
}

/// Upload every input image the job declares.
pub async fn seed_inputs(storage: &MemoryArtifactStore, job: &JobMessage) {
    for key in job.product_images.iter().chain(&job.competitor_images) {
        storage.put_object(key.clone(), format!("image bytes for {}", key)).await;
    }
}
