//! Processing functions that operations dispatch to by name

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::client::GmailClient;
use crate::error::Result;
use crate::label_manager::LabelManager;
use crate::models::Message;

/// Handles one fetched message
pub type MessageFn = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Runs once with no input and produces the operation's report value
pub type StandaloneFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A registered processing function
#[derive(Clone)]
pub enum Process {
    /// Invoked once per message matched by the operation's query
    PerMessage(MessageFn),
    /// Invoked once, for operations without a query
    Standalone(StandaloneFn),
}

/// Shape of a [`Process`], used when validating operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    PerMessage,
    Standalone,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::PerMessage => write!(f, "per-message"),
            ProcessKind::Standalone => write!(f, "standalone"),
        }
    }
}

impl Process {
    pub fn kind(&self) -> ProcessKind {
        match self {
            Process::PerMessage(_) => ProcessKind::PerMessage,
            Process::Standalone(_) => ProcessKind::Standalone,
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process({})", self.kind())
    }
}

/// Table of processing functions keyed by name
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, Process>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a per-message process, replacing any existing one of that name
    pub fn register_message<F, Fut>(&mut self, name: impl Into<String>, process: F) -> &mut Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let process: MessageFn = Arc::new(move |message| process(message).boxed());
        self.processes
            .insert(name.into(), Process::PerMessage(process));
        self
    }

    /// Register a standalone process, replacing any existing one of that name
    pub fn register_standalone<F, Fut>(&mut self, name: impl Into<String>, process: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let process: StandaloneFn = Arc::new(move || process().boxed());
        self.processes
            .insert(name.into(), Process::Standalone(process));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Process> {
        self.processes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registry holding the built-in processes
    ///
    /// - `accept`: accepts every message unchanged
    /// - `log_subject`: logs each message's id, date and subject
    /// - `archive`: removes each message from the inbox
    /// - `noop`: standalone, reports `null`
    pub fn with_builtins(client: Arc<dyn GmailClient>) -> Self {
        let mut registry = Self::new();
        let labels = Arc::new(LabelManager::new(client));

        registry
            .register_message("accept", |_message| async { Ok(()) })
            .register_message("log_subject", |message| async move {
                info!(
                    "{} {} {}",
                    message.id,
                    message.timestamp.format("%Y-%m-%d %H:%M"),
                    message.subject.as_deref().unwrap_or("(no subject)")
                );
                Ok(())
            })
            .register_message("archive", move |message| {
                let labels = Arc::clone(&labels);
                async move { labels.archive(&message.id).await }
            })
            .register_standalone("noop", || async { Ok(Value::Null) });

        registry
    }
}

impl fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("processes", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockGmailStore;
    use crate::error::BatchError;
    use crate::label_manager::INBOX_LABEL;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            timestamp: Utc::now(),
            subject: None,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let mut registry = ProcessRegistry::new();
        registry
            .register_message("count", move |_m| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .register_standalone("answer", || async { Ok(serde_json::json!(42)) });

        match registry.get("count") {
            Some(Process::PerMessage(process)) => {
                process(message("1")).await.unwrap();
                process(message("2")).await.unwrap();
            }
            other => panic!("unexpected process: {:?}", other),
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        match registry.get("answer") {
            Some(Process::Standalone(process)) => {
                assert_eq!(process().await.unwrap(), serde_json::json!(42));
            }
            other => panic!("unexpected process: {:?}", other),
        }

        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["answer", "count"]);
    }

    #[tokio::test]
    async fn test_process_errors_surface() {
        let mut registry = ProcessRegistry::new();
        registry.register_message("reject", |m| async move {
            Err(BatchError::ProcessFailed(format!("cannot parse {}", m.id)))
        });

        let Some(Process::PerMessage(process)) = registry.get("reject") else {
            panic!("reject not registered as per-message");
        };
        let err = process(message("x1")).await.unwrap_err();
        assert!(err.to_string().contains("x1"));
    }

    #[tokio::test]
    async fn test_builtins() {
        let mut mock = MockGmailStore::new();
        mock.expect_modify_message_labels()
            .withf(|id, add, remove| id == "m1" && add.is_empty() && remove[0] == INBOX_LABEL)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let registry = ProcessRegistry::with_builtins(Arc::new(mock));

        assert_eq!(registry.get("accept").map(Process::kind), Some(ProcessKind::PerMessage));
        assert_eq!(registry.get("noop").map(Process::kind), Some(ProcessKind::Standalone));

        let Some(Process::PerMessage(archive)) = registry.get("archive") else {
            panic!("archive not registered as per-message");
        };
        archive(message("m1")).await.unwrap();

        let Some(Process::Standalone(noop)) = registry.get("noop") else {
            panic!("noop not registered as standalone");
        };
        assert_eq!(noop().await.unwrap(), Value::Null);
    }
}
