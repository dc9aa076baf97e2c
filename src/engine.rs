//! Batch execution: run every enabled operation and collect a report
//!
//! Operations start in declaration order and settle concurrently. A query
//! operation fetches every matching message not already carrying the
//! processed label, hands each one to its process, and labels it once the
//! process has succeeded. Its report value is the number of messages
//! processed. An operation without a query runs its process once and
//! reports whatever that returns.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::auth::Session;
use crate::batch::{Batch, Operation};
use crate::error::{BatchError, Result};
use crate::fetcher::MessageFetcher;
use crate::label_manager::LabelManager;
use crate::process::Process;
use crate::query::Query;
use crate::report::Report;

/// What a run does when an operation fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The first failed operation fails the whole run; no report is produced
    #[default]
    Abort,
    /// Every operation settles; failures are recorded in the report
    Continue,
}

impl std::str::FromStr for FailurePolicy {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(BatchError::ConfigError(format!(
                "Unknown failure policy '{}' (expected 'abort' or 'continue')",
                other
            ))),
        }
    }
}

/// Knobs for a batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    /// Label processed messages so later runs skip them
    pub mark_processed: bool,
    pub processed_label: String,
    pub failure_policy: FailurePolicy,
    /// Messages fetched and processed at once within one operation
    pub max_concurrent_messages: usize,
    /// Default `after:` bound for queries that set neither bound
    pub emails_after: Option<String>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            mark_processed: true,
            processed_label: "Processed".to_string(),
            failure_policy: FailurePolicy::Abort,
            max_concurrent_messages: 10,
            emails_after: None,
        }
    }
}

/// Runs batches against a session's message store
pub struct BatchEngine {
    settings: ExecutionSettings,
}

impl BatchEngine {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Run every enabled operation of `batch` and collect the report
    ///
    /// Disabled operations are skipped and get no report entry. Under
    /// [`FailurePolicy::Abort`] the first failed operation fails the run
    /// with [`BatchError::OperationFailed`] once every other operation has
    /// settled; no report is returned.
    pub async fn run(&self, batch: &Batch, session: &Session) -> Result<Report> {
        let mut report = Report::new(batch.name());
        info!(
            run_id = %report.run_id,
            "Starting batch '{}' for {} ({} operations)",
            batch.name(),
            session.principal,
            batch.operations().len()
        );

        let fetcher = MessageFetcher::new(
            session.client.clone(),
            self.settings.max_concurrent_messages,
        )
        .with_emails_after(self.settings.emails_after.clone());
        let labels = LabelManager::new(session.client.clone());

        let fetcher = &fetcher;
        let labels = &labels;
        let mut pending = FuturesUnordered::new();

        for prepared in batch.operations() {
            let operation = &prepared.operation;
            let process = match (&prepared.process, operation.enabled) {
                (Some(process), true) => process,
                _ => {
                    warn!("Skipping disabled operation '{}'", operation.name);
                    continue;
                }
            };

            info!("Starting operation '{}' ({})", operation.name, operation.process);
            pending.push(async move {
                let outcome = self.run_operation(operation, process, fetcher, labels).await;
                (operation, outcome)
            });
        }

        let mut first_failure = None;
        while let Some((operation, outcome)) = pending.next().await {
            match outcome {
                Ok(value) => {
                    info!("Operation '{}' finished: {}", operation.name, value);
                    report.record_success(operation.process.clone(), value);
                }
                Err(e) => {
                    error!("Operation '{}' failed: {}", operation.name, e);
                    match self.settings.failure_policy {
                        FailurePolicy::Abort => {
                            if first_failure.is_none() {
                                first_failure = Some(BatchError::OperationFailed {
                                    operation: operation.name.clone(),
                                    source: Box::new(e),
                                });
                            }
                        }
                        FailurePolicy::Continue => {
                            report.record_failure(operation.process.clone(), e.to_string());
                        }
                    }
                }
            }
        }

        // Operations still in flight settle before an abort is reported
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        report.finish();
        info!(
            run_id = %report.run_id,
            "Batch '{}' finished with {} report entries",
            batch.name(),
            report.len()
        );
        Ok(report)
    }

    async fn run_operation(
        &self,
        operation: &Operation,
        process: &Process,
        fetcher: &MessageFetcher,
        labels: &LabelManager,
    ) -> Result<Value> {
        match (process, &operation.query) {
            (Process::PerMessage(handler), Some(filter)) => {
                let query = Query::from(filter.with_excluded_label(&self.settings.processed_label));
                debug!("Operation '{}' query: {}", operation.name, query);

                let processed = fetcher
                    .for_each_message(&query, operation.max_results, |message| async move {
                        let message_id = message.id.clone();

                        handler(message)
                            .await
                            .map_err(|e| BatchError::MessageProcessingFailed {
                                message_id: message_id.clone(),
                                source: Box::new(e),
                            })?;

                        if self.settings.mark_processed {
                            self.mark_processed(labels, &message_id).await?;
                        }
                        debug!("Processed message {}", message_id);
                        Ok(())
                    })
                    .await?;

                Ok(Value::from(processed.len()))
            }
            (Process::Standalone(handler), None) => handler().await,
            (process, _) => Err(BatchError::ConfigError(format!(
                "Operation '{}' cannot run a {} process",
                operation.name,
                process.kind()
            ))),
        }
    }

    async fn mark_processed(&self, labels: &LabelManager, message_id: &str) -> Result<()> {
        let labeling = async {
            let label_id = labels
                .resolve_label_id(&self.settings.processed_label)
                .await?;
            labels.set_label(message_id, &label_id, false).await
        };

        labeling
            .await
            .map_err(|e| BatchError::LabelingFailed {
                message_id: message_id.to_string(),
                source: Box::new(e),
            })
    }
}
