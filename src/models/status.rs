use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::job::TaskStatus;

/// A status record as observers see it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub output_artifact_keys: Option<BTreeMap<String, String>>,
}

/// One named field of a status record, with the value it is set to.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusField {
    Status(TaskStatus),
    ErrorMessage(Option<String>),
    StartTime(Option<i64>),
    EndTime(Option<i64>),
    OutputArtifactKeys(Option<BTreeMap<String, String>>),
}

impl StatusField {
    pub fn column(&self) -> &'static str {
        match self {
            StatusField::Status(_) => "status",
            StatusField::ErrorMessage(_) => "error_message",
            StatusField::StartTime(_) => "start_time",
            StatusField::EndTime(_) => "end_time",
            StatusField::OutputArtifactKeys(_) => "output_artifact_keys",
        }
    }
}

/// Partial update for one lifecycle transition.
///
/// Only the listed fields are written; the store applies them in a single
/// statement so readers never observe half of a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    fields: Vec<StatusField>,
}

impl StatusUpdate {
    /// Fresh attempt. Clears whatever a previous failed attempt left behind.
    pub fn pending() -> Self {
        Self {
            fields: vec![
                StatusField::Status(TaskStatus::Pending),
                StatusField::ErrorMessage(None),
                StatusField::StartTime(None),
                StatusField::EndTime(None),
                StatusField::OutputArtifactKeys(None),
            ],
        }
    }

    pub fn running(start_time: i64) -> Self {
        Self {
            fields: vec![
                StatusField::Status(TaskStatus::Running),
                StatusField::StartTime(Some(start_time)),
            ],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            fields: vec![
                StatusField::Status(TaskStatus::Error),
                StatusField::ErrorMessage(Some(message.into())),
            ],
        }
    }

    pub fn done(end_time: i64, output_artifact_keys: BTreeMap<String, String>) -> Self {
        Self {
            fields: vec![
                StatusField::Status(TaskStatus::Done),
                StatusField::EndTime(Some(end_time)),
                StatusField::OutputArtifactKeys(Some(output_artifact_keys)),
            ],
        }
    }

    pub fn fields(&self) -> &[StatusField] {
        &self.fields
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.fields.iter().find_map(|f| match f {
            StatusField::Status(s) => Some(*s),
            _ => None,
        })
    }

    /// Apply the update to an in-memory record.
    pub fn apply_to(&self, record: &mut StatusRecord) {
        for field in &self.fields {
            match field {
                StatusField::Status(s) => record.status = *s,
                StatusField::ErrorMessage(m) => record.error_message = m.clone(),
                StatusField::StartTime(t) => record.start_time = *t,
                StatusField::EndTime(t) => record.end_time = *t,
                StatusField::OutputArtifactKeys(k) => record.output_artifact_keys = k.clone(),
            }
        }
    }
}
