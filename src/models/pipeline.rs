use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Pipeline declaration loaded from the pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding files that stages publish via `publish_before`.
    #[serde(default = "default_publish_dir")]
    pub publish_dir: PathBuf,

    /// Concurrency groups, executed in declared order.
    pub groups: Vec<GroupConfig>,

    /// Logical report name -> path under `reports/<task_id>/`.
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Parallel workers for this group; 1 means strictly sequential.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub requires_artifacts: bool,

    /// Overrides the worker's default stage timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Files in `publish_dir` uploaded to `reports/<task_id>/<file>` before this stage runs.
    #[serde(default)]
    pub publish_before: Vec<String>,
}

fn default_publish_dir() -> PathBuf {
    PathBuf::from("data/reports/report_stats")
}

fn default_pool_size() -> usize {
    1
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.groups.is_empty() {
            return Err(PipelineError::Invalid("pipeline declares no groups".to_string()));
        }
        if self.outputs.is_empty() {
            return Err(PipelineError::Invalid("pipeline declares no outputs".to_string()));
        }

        let mut names = HashSet::new();
        for (idx, group) in self.groups.iter().enumerate() {
            if group.stages.is_empty() {
                return Err(PipelineError::Invalid(format!("group {} has no stages", idx)));
            }
            if group.pool_size == 0 {
                return Err(PipelineError::Invalid(format!("group {} has pool_size 0", idx)));
            }
            for stage in &group.stages {
                if stage.name.is_empty() || stage.program.is_empty() {
                    return Err(PipelineError::Invalid(format!(
                        "group {} has a stage without name or program",
                        idx
                    )));
                }
                if !names.insert(stage.name.as_str()) {
                    return Err(PipelineError::Invalid(format!(
                        "duplicate stage name '{}'",
                        stage.name
                    )));
                }
                if let Some(file) = stage.publish_before.iter().find(|f| !is_plain_relative(f)) {
                    return Err(PipelineError::Invalid(format!(
                        "stage '{}' publishes '{}', which is not a plain relative path",
                        stage.name, file
                    )));
                }
            }
        }

        if let Some(path) = self.outputs.values().find(|p| !is_plain_relative(p)) {
            return Err(PipelineError::Invalid(format!(
                "output path '{}' is not a plain relative path",
                path
            )));
        }

        Ok(())
    }

    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(|g| g.stages.len()).sum()
    }
}

fn is_plain_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)))
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to read pipeline file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse pipeline file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid pipeline: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "groups": [
            {"pool_size": 2, "stages": [
                {"name": "product", "program": "python3", "args": ["product.py"], "requires_artifacts": true},
                {"name": "competitor", "program": "python3", "args": ["competitor.py"], "requires_artifacts": true}
            ]},
            {"stages": [
                {"name": "report", "program": "python3", "args": ["report.py"], "timeout_secs": 60,
                 "publish_before": ["1.pdf"]}
            ]}
        ],
        "outputs": {"final_report": "final_report.pdf"}
    }"#;

    #[test]
    fn test_parse_sample_pipeline() {
        let config = PipelineConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.groups.len(), 2);
        assert_eq!(config.groups[0].pool_size, 2);
        assert_eq!(config.groups[1].pool_size, 1);
        assert_eq!(config.groups[1].stages[0].timeout_secs, Some(60));
        assert_eq!(config.stage_count(), 3);
        assert_eq!(config.publish_dir, PathBuf::from("data/reports/report_stats"));
    }

    #[test]
    fn test_duplicate_stage_names_rejected() {
        let raw = SAMPLE.replace("\"competitor\", \"program\"", "\"product\", \"program\"");
        let err = PipelineConfig::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("duplicate stage name"));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let raw = SAMPLE.replace("\"pool_size\": 2", "\"pool_size\": 0");
        assert!(matches!(
            PipelineConfig::from_json(&raw),
            Err(PipelineError::Invalid(_))
        ));
    }

    #[test]
    fn test_output_outside_report_prefix_rejected() {
        let raw = SAMPLE.replace("final_report.pdf", "../elsewhere.pdf");
        assert!(PipelineConfig::from_json(&raw).is_err());
    }

    #[test]
    fn test_repo_pipeline_file_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("pipeline.json");
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.groups[0].pool_size, 2);
        assert_eq!(config.outputs.len(), 4);
    }
}
