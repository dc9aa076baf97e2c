//! Batch definitions and their validation against the process registry

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{BatchError, Result};
use crate::process::{Process, ProcessKind, ProcessRegistry};
use crate::query::Filter;

/// One unit of work in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Display name, used in logs
    pub name: String,

    /// Registered process to run; also the key of this operation's report entry
    pub process: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Messages to process; without one the process runs once, standalone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Filter>,

    /// Cap on the number of messages fetched for this operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

impl Operation {
    pub fn new(name: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process: process.into(),
            enabled: true,
            query: None,
            max_results: None,
        }
    }

    pub fn with_query(mut self, query: Filter) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A named, ordered list of operations as written in a batch file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDefinition {
    pub name: String,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl BatchDefinition {
    pub fn new(name: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            name: name.into(),
            operations,
        }
    }

    /// Load a batch file; `.json` files are JSON, anything else TOML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let definition: BatchDefinition = if is_json {
            serde_json::from_str(&contents).map_err(|e| {
                BatchError::ConfigError(format!(
                    "Failed to parse batch file {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            toml::from_str(&contents).map_err(|e| {
                BatchError::ConfigError(format!(
                    "Failed to parse batch file {}: {}",
                    path.display(),
                    e
                ))
            })?
        };

        debug!(
            "Loaded batch '{}' with {} operations from {}",
            definition.name,
            definition.operations.len(),
            path.display()
        );
        Ok(definition)
    }
}

/// An operation with its process resolved
///
/// `process` is `None` only for disabled operations, which are never run.
#[derive(Debug, Clone)]
pub struct PreparedOperation {
    pub operation: Operation,
    pub process: Option<Process>,
}

/// A batch ready to run: every enabled operation is validated and resolved
#[derive(Debug, Clone)]
pub struct Batch {
    name: String,
    operations: Vec<PreparedOperation>,
}

impl Batch {
    /// Resolve every enabled operation against `registry`
    ///
    /// Fails on an unknown process name, a process whose kind does not fit
    /// the operation (per-message without a query, standalone with one), two
    /// enabled operations sharing a process key, or an invalid query.
    pub fn new(definition: BatchDefinition, registry: &ProcessRegistry) -> Result<Self> {
        let mut seen_processes = HashSet::new();
        let mut operations = Vec::with_capacity(definition.operations.len());

        for operation in definition.operations {
            if !operation.enabled {
                operations.push(PreparedOperation {
                    operation,
                    process: None,
                });
                continue;
            }

            let process = registry.get(&operation.process).cloned().ok_or_else(|| {
                BatchError::UnknownOperation {
                    operation: operation.name.clone(),
                    process: operation.process.clone(),
                }
            })?;

            let expected = if operation.query.is_some() {
                ProcessKind::PerMessage
            } else {
                ProcessKind::Standalone
            };
            if process.kind() != expected {
                return Err(BatchError::ConfigError(format!(
                    "Operation '{}' needs a {} process but '{}' is {}",
                    operation.name,
                    expected,
                    operation.process,
                    process.kind()
                )));
            }

            if !seen_processes.insert(operation.process.clone()) {
                return Err(BatchError::ConfigError(format!(
                    "Process '{}' is used by more than one enabled operation",
                    operation.process
                )));
            }

            if let Some(query) = &operation.query {
                query.validate()?;
            }

            operations.push(PreparedOperation {
                operation,
                process: Some(process),
            });
        }

        Ok(Self {
            name: definition.name,
            operations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &[PreparedOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn registry() -> ProcessRegistry {
        let mut registry = ProcessRegistry::new();
        registry
            .register_message("importReceipts", |_m| async { Ok(()) })
            .register_message("importVenmo", |_m| async { Ok(()) })
            .register_standalone("summarize", || async { Ok(serde_json::json!("ok")) });
        registry
    }

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml_definition() {
        let file = write_temp(
            ".toml",
            r#"
            name = "Daily"

            [[operations]]
            name = "Receipts"
            process = "importReceipts"
            max_results = 50

            [operations.query]
            label = "Receipts"

            [operations.query.not]
            subject = "refund"

            [[operations]]
            name = "Summary"
            process = "summarize"
            enabled = false
            "#,
        );

        let definition = BatchDefinition::load(file.path()).unwrap();

        assert_eq!(definition.name, "Daily");
        assert_eq!(definition.operations.len(), 2);
        let receipts = &definition.operations[0];
        assert!(receipts.enabled);
        assert_eq!(receipts.max_results, Some(50));
        assert_eq!(
            receipts.query.as_ref().map(Filter::to_query).as_deref(),
            Some("label:Receipts -subject:refund")
        );
        assert!(!definition.operations[1].enabled);
    }

    #[test]
    fn test_load_json_definition() {
        let file = write_temp(
            ".json",
            r#"{
                "name": "Payments",
                "operations": [
                    { "name": "Venmo", "process": "importVenmo", "query": { "from": "venmo@venmo.com", "snippet": true } },
                    { "name": "Summary", "process": "summarize" }
                ]
            }"#,
        );

        let definition = BatchDefinition::load(file.path()).unwrap();

        assert_eq!(definition.operations[0].query.as_ref().map(|q| q.snippet), Some(true));
        assert!(definition.operations[1].query.is_none());
    }

    #[test]
    fn test_load_invalid_file() {
        let file = write_temp(".toml", "name = \n");
        let err = BatchDefinition::load(file.path()).unwrap_err();
        assert!(matches!(err, BatchError::ConfigError(_)));

        let missing = BatchDefinition::load("/nonexistent/batch.toml");
        assert!(matches!(missing, Err(BatchError::IoError(_))));
    }

    #[test]
    fn test_batch_resolves_enabled_operations() {
        let definition = BatchDefinition::new(
            "Daily",
            vec![
                Operation::new("Receipts", "importReceipts")
                    .with_query(Filter::new().with_term("label", "Receipts")),
                Operation::new("Old", "notRegistered").disabled(),
                Operation::new("Summary", "summarize"),
            ],
        );

        let batch = Batch::new(definition, &registry()).unwrap();

        assert_eq!(batch.name(), "Daily");
        assert_eq!(batch.operations().len(), 3);
        assert!(batch.operations()[0].process.is_some());
        assert!(batch.operations()[1].process.is_none());
    }

    #[test]
    fn test_unknown_process_fails_fast() {
        let definition = BatchDefinition::new(
            "Daily",
            vec![
                Operation::new("Receipts", "importReceipts")
                    .with_query(Filter::new().with_term("label", "Receipts")),
                Operation::new("Rows", "importRows"),
            ],
        );

        let err = Batch::new(definition, &registry()).unwrap_err();
        assert!(matches!(
            err,
            BatchError::UnknownOperation { ref process, .. } if process == "importRows"
        ));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_process_kind_must_fit_operation() {
        let per_message_without_query = BatchDefinition::new(
            "B",
            vec![Operation::new("Receipts", "importReceipts")],
        );
        assert!(matches!(
            Batch::new(per_message_without_query, &registry()),
            Err(BatchError::ConfigError(_))
        ));

        let standalone_with_query = BatchDefinition::new(
            "B",
            vec![Operation::new("Summary", "summarize")
                .with_query(Filter::new().with_term("label", "X"))],
        );
        assert!(matches!(
            Batch::new(standalone_with_query, &registry()),
            Err(BatchError::ConfigError(_))
        ));
    }

    #[test]
    fn test_duplicate_process_keys_rejected() {
        let definition = BatchDefinition::new(
            "B",
            vec![
                Operation::new("A", "importVenmo").with_query(Filter::new().with_term("from", "a")),
                Operation::new("B", "importVenmo").with_query(Filter::new().with_term("from", "b")),
            ],
        );
        let err = Batch::new(definition, &registry()).unwrap_err();
        assert!(err.to_string().contains("importVenmo"));

        // A disabled duplicate is fine
        let definition = BatchDefinition::new(
            "B",
            vec![
                Operation::new("A", "importVenmo").with_query(Filter::new().with_term("from", "a")),
                Operation::new("B", "importVenmo")
                    .with_query(Filter::new().with_term("from", "b"))
                    .disabled(),
            ],
        );
        assert!(Batch::new(definition, &registry()).is_ok());
    }

    #[test]
    fn test_invalid_query_rejected() {
        let definition = BatchDefinition::new(
            "B",
            vec![Operation::new("A", "importVenmo")
                .with_query(Filter::new().with_term("subject", "say \"hi\""))],
        );
        assert!(matches!(
            Batch::new(definition, &registry()),
            Err(BatchError::ConfigError(_))
        ));
    }

    #[test]
    fn test_empty_batch() {
        let batch = Batch::new(BatchDefinition::new("Empty", vec![]), &registry()).unwrap();
        assert!(batch.is_empty());
    }
}
