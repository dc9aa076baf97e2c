//! Per-run report: one outcome per operation, keyed by process name

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::error::Result;

/// How a single operation settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Message count for query operations, or the standalone process's value
    Succeeded { value: Value },
    Failed { reason: String },
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Succeeded { .. })
    }
}

/// Result of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub batch: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcomes: BTreeMap<String, OperationOutcome>,
}

impl Report {
    pub fn new(batch: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            batch: batch.into(),
            started_at: Utc::now(),
            completed_at: None,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record_success(&mut self, process: impl Into<String>, value: Value) {
        self.outcomes
            .insert(process.into(), OperationOutcome::Succeeded { value });
    }

    pub fn record_failure(&mut self, process: impl Into<String>, reason: impl Into<String>) {
        self.outcomes.insert(
            process.into(),
            OperationOutcome::Failed {
                reason: reason.into(),
            },
        );
    }

    /// Stamp the completion time
    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn get(&self, process: &str) -> Option<&OperationOutcome> {
        self.outcomes.get(process)
    }

    /// Success value recorded for `process`, if it succeeded
    pub fn value(&self, process: &str) -> Option<&Value> {
        match self.outcomes.get(process) {
            Some(OperationOutcome::Succeeded { value }) => Some(value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.values().any(|o| !o.is_success())
    }

    pub fn duration_seconds(&self) -> i64 {
        self.completed_at
            .map(|done| (done - self.started_at).num_seconds())
            .unwrap_or(0)
    }

    /// Render as a markdown summary
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("# Batch Report: {}\n\n", self.batch));
        if let Some(completed_at) = self.completed_at {
            md.push_str(&format!(
                "Generated: {}\n\n",
                completed_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Run ID:** {}\n", self.run_id));
        md.push_str(&format!(
            "- **Operations:** {} ({} failed)\n",
            self.outcomes.len(),
            self.outcomes.values().filter(|o| !o.is_success()).count()
        ));
        md.push_str(&format!(
            "- **Processing time:** {} minutes {} seconds\n\n",
            self.duration_seconds() / 60,
            self.duration_seconds() % 60
        ));

        md.push_str("## Operations\n\n");
        if self.outcomes.is_empty() {
            md.push_str("_No operations ran._\n");
            return md;
        }

        md.push_str("| Process | Status | Result |\n");
        md.push_str("|---------|--------|--------|\n");
        for (process, outcome) in &self.outcomes {
            let (status, detail) = match outcome {
                OperationOutcome::Succeeded { value } => ("ok", value.to_string()),
                OperationOutcome::Failed { reason } => ("failed", reason.replace('|', "\\|")),
            };
            md.push_str(&format!("| {} | {} | {} |\n", process, status, detail));
        }

        md
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report; `.json` paths get JSON, anything else markdown
    pub async fn save(&self, path: &Path) -> Result<()> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let contents = if is_json {
            self.to_json()?
        } else {
            self.to_markdown()
        };
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}
