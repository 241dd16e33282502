use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Lifecycle status of an analysis task as stored in the status table.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Error,
    Done,
}

/// Which input image set a remote key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactKind {
    Product,
    Competitor,
}

impl ArtifactKind {
    /// Remote key prefix and local directory name for this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Product => "product_images",
            ArtifactKind::Competitor => "competitor_images",
        }
    }

    /// Local path (relative to the task directory) for a remote input key.
    ///
    /// Keys following `<kind>_images/<task_id>/<rest>` keep only `<rest>`;
    /// anything else keeps the full key so distinct keys never collide.
    pub fn local_relative_path(&self, task_id: &str, key: &str) -> PathBuf {
        let prefix = format!("{}/{}/", self.dir_name(), task_id);
        match key.strip_prefix(&prefix) {
            Some(rest) if !rest.is_empty() => PathBuf::from(rest),
            _ => PathBuf::from(key),
        }
    }
}

/// Remote key under which a task's report is published.
pub fn report_key(task_id: &str, name: &str) -> String {
    format!("reports/{}/{}", task_id, name)
}

/// Job descriptor carried in a queue message body.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct JobMessage {
    #[garde(length(min = 1, max = 128), pattern(r"^[A-Za-z0-9_-][A-Za-z0-9_.-]*$"))]
    pub task_id: String,

    #[garde(length(min = 1))]
    pub company_name: String,

    #[garde(
        inner(custom(relative_key)),
        custom(distinct_local_paths(&self.task_id, ArtifactKind::Product))
    )]
    pub product_images: Vec<String>,

    #[garde(
        inner(custom(relative_key)),
        custom(distinct_local_paths(&self.task_id, ArtifactKind::Competitor))
    )]
    pub competitor_images: Vec<String>,
}

impl JobMessage {
    /// Decode and validate a message body.
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        let job: JobMessage = serde_json::from_str(body)?;
        job.validate()?;
        Ok(job)
    }

    pub fn keys(&self, kind: ArtifactKind) -> &[String] {
        match kind {
            ArtifactKind::Product => &self.product_images,
            ArtifactKind::Competitor => &self.competitor_images,
        }
    }
}

// Keys become local paths during staging, so they must stay inside the task directory.
fn relative_key(value: &String, _ctx: &()) -> garde::Result {
    if value.is_empty() {
        return Err(garde::Error::new("artifact key is empty"));
    }
    let escapes = Path::new(value)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(garde::Error::new("artifact key must be a plain relative path"));
    }
    Ok(())
}

// Two keys of one kind must never stage to the same local file.
fn distinct_local_paths<'a>(
    task_id: &'a str,
    kind: ArtifactKind,
) -> impl FnOnce(&Vec<String>, &()) -> garde::Result + 'a {
    move |keys, _| {
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(kind.local_relative_path(task_id, key)) {
                return Err(garde::Error::new(format!(
                    "{} key '{}' stages to the same local file as an earlier key",
                    kind, key
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Undecodable job message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid job message: {0}")]
    Invalid(#[from] garde::Report),
}

/// Everything a stage invocation gets to see about its job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobContext {
    pub task_id: String,
    pub company_name: String,
    pub product_paths: Vec<PathBuf>,
    pub competitor_paths: Vec<PathBuf>,
}

impl JobContext {
    /// Same job without the staged artifact paths, for stages that don't need them.
    pub fn without_artifacts(&self) -> Self {
        Self {
            task_id: self.task_id.clone(),
            company_name: self.company_name.clone(),
            product_paths: Vec::new(),
            competitor_paths: Vec::new(),
        }
    }
}
