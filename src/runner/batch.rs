//! Batch files
//!
//! A batch is a TOML file listing task configurations, each expanded into
//! `replications` configurations:
//!
//! ```toml
//! replications = 2
//!
//! [[task]]
//! name = "growth-fast"
//! model = "demo"
//! destination = { remote = "server-x" }
//!
//! [task.parameters]
//! steps = "20"
//! growth = "0.9"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{RunInformation, RunOutcome, TaskConfiguration};

fn default_replications() -> u32 {
    1
}

/// Parsed batch file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Replications of every task
    #[serde(default = "default_replications")]
    pub replications: u32,

    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskConfiguration>,
}

impl Batch {
    /// Load and validate a batch file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::IoRead {
            path: path.to_path_buf(),
            source,
        })?;
        let batch: Batch = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("batch file {}: {}", path.display(), e),
            source: Some(e),
        })?;
        batch.validate()?;
        debug!(path = %path.display(), tasks = batch.tasks.len(), "Batch loaded");
        Ok(batch)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(Error::config_field_invalid("task", "batch contains no tasks"));
        }
        if self.replications == 0 {
            return Err(Error::config_field_invalid("replications", "replications must be at least 1"));
        }

        let mut names = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(Error::config_field_invalid("task.name", "task name must not be empty"));
            }
            if !names.insert(task.name.as_str()) {
                return Err(Error::config_field_invalid(
                    "task.name",
                    format!("duplicate task name '{}'", task.name),
                ));
            }
        }
        Ok(())
    }

    /// One configuration per task and replication
    ///
    /// With more than one replication, names get a `/rep-<n>` suffix.
    pub fn configurations(&self) -> Vec<TaskConfiguration> {
        let mut configs = Vec::with_capacity(self.tasks.len() * self.replications as usize);
        for task in &self.tasks {
            for rep in 0..self.replications {
                let mut config = task.clone().with_replication(rep);
                if self.replications > 1 {
                    config.name = format!("{}/rep-{}", task.name, rep);
                }
                configs.push(config);
            }
        }
        configs
    }
}

/// Terminal report of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub config: TaskConfiguration,
    pub info: RunInformation,
}

/// Outcome counts of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[JobReport]) -> Self {
        let mut summary = Self {
            total: reports.len(),
            ..Self::default()
        };
        for report in reports {
            match report.info.outcome {
                RunOutcome::Succeeded => summary.succeeded += 1,
                RunOutcome::Cancelled => summary.cancelled += 1,
                RunOutcome::Failed | RunOutcome::Pending => summary.failed += 1,
            }
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RemoteDestination;

    #[test]
    fn test_parse_and_expand() {
        let batch: Batch = toml::from_str(
            r#"
replications = 2

[[task]]
name = "a"
model = "demo"

[[task]]
name = "b"
model = "demo"
destination = { remote = "server-x" }

[task.parameters]
steps = "3"
"#,
        )
        .unwrap();
        batch.validate().unwrap();

        let configs = batch.configurations();
        assert_eq!(configs.len(), 4);
        assert_eq!(configs[0].name, "a/rep-0");
        assert_eq!(configs[3].name, "b/rep-1");
        assert_eq!(configs[3].replication, 1);
        assert_eq!(configs[3].remote_destination(), Some(&RemoteDestination::new("server-x")));
        assert_eq!(configs[3].parameter::<u64>("steps"), Some(3));
    }

    #[test]
    fn test_single_replication_keeps_names() {
        let batch: Batch = toml::from_str("[[task]]\nname = \"a\"\nmodel = \"demo\"\n").unwrap();
        assert_eq!(batch.configurations()[0].name, "a");
    }

    #[test]
    fn test_validation() {
        let empty: Batch = toml::from_str("").unwrap();
        assert!(empty.validate().is_err());

        let dup: Batch =
            toml::from_str("[[task]]\nname = \"a\"\nmodel = \"demo\"\n[[task]]\nname = \"a\"\nmodel = \"demo\"\n")
                .unwrap();
        assert!(dup.validate().is_err());
    }

    #[test]
    fn test_summary_counts() {
        let config = TaskConfiguration::new("a", "demo");
        let mut ok = RunInformation::initialized(&config, crate::types::TaskId::new("a"), 0);
        ok.mark_succeeded();
        let reports = vec![
            JobReport { config: config.clone(), info: ok },
            JobReport {
                config: config.clone(),
                info: RunInformation::cancelled_before_start(&config),
            },
            JobReport {
                config: config.clone(),
                info: RunInformation::setup_failed(&config, "boom"),
            },
        ];

        let summary = BatchSummary::from_reports(&reports);
        assert_eq!(
            summary,
            BatchSummary { total: 3, succeeded: 1, failed: 1, cancelled: 1 }
        );
        assert!(!summary.all_succeeded());
    }
}
