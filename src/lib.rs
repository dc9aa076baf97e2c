//! Gmail Batch Runner
//!
//! Runs named batches of operations over a user's Gmail messages. Each
//! operation pairs a registered process with an optional structured query:
//! query operations hand every matching message to the process and label it
//! as processed afterwards, standalone operations run once.
//!
//! # Overview
//!
//! - **Authentication**: installed-app OAuth2 or a local users file keyed by API key
//! - **Queries**: structured filters translated into Gmail search strings
//! - **Fetching**: bounded-concurrency message retrieval with body selection
//! - **Labels**: name-to-id resolution with single-flight creation
//! - **Execution**: concurrent operations, configurable failure policy, per-run report
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_batch::{auth, BatchDefinition, Batch, BatchEngine, Config, ProcessRegistry};
//! use gmail_batch::{ProductionGmailClient, Session};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-batch/token.json".as_ref(),
//!     )
//!     .await?;
//!     let client = ProductionGmailClient::new(
//!         hub,
//!         config.store.max_concurrent_requests,
//!         Duration::from_secs(config.store.request_timeout_secs),
//!     );
//!     let session = Session::new("me", Arc::new(client));
//!
//!     let mut registry = ProcessRegistry::with_builtins(session.client.clone());
//!     registry.register_message("countReceipts", |message| async move {
//!         tracing::info!("receipt {}", message.id);
//!         Ok(())
//!     });
//!
//!     let batch = Batch::new(BatchDefinition::load("daily.toml")?, &registry)?;
//!     let report = BatchEngine::new(config.execution_settings())
//!         .run(&batch, &session)
//!         .await?;
//!     println!("{}", report.to_markdown());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 hubs, the local user directory and sessions
//! - [`batch`] - Batch definitions and validation against a registry
//! - [`cli`] - Command-line interface
//! - [`client`] - Gmail API client trait and production implementation
//! - [`config`] - Configuration management
//! - [`engine`] - Batch execution
//! - [`error`] - Error types and result aliases
//! - [`fetcher`] - Query resolution and concurrent message fetching
//! - [`label_manager`] - Label resolution and message labeling
//! - [`models`] - Core data structures
//! - [`process`] - Process registry
//! - [`query`] - Structured filters and query translation
//! - [`report`] - Per-run report

pub mod auth;
pub mod batch;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod label_manager;
pub mod models;
pub mod process;
pub mod query;
pub mod report;

pub use error::{BatchError, Result};

pub use models::{ContentPart, LabelInfo, Message, RawMessage};

pub use query::{Filter, Query, TermValue};

pub use auth::{LocalSessionProvider, LocalUserDirectory, Session, SessionProvider, UserRecord};

pub use config::{AuthConfig, Config, ExecutionConfig, LabelConfig, StoreConfig};

pub use client::{GmailClient, ProductionGmailClient};

pub use fetcher::MessageFetcher;
pub use label_manager::LabelManager;

pub use process::{Process, ProcessKind, ProcessRegistry};
pub use batch::{Batch, BatchDefinition, Operation};
pub use engine::{BatchEngine, ExecutionSettings, FailurePolicy};
pub use report::{OperationOutcome, Report};

pub use cli::{Cli, Commands, ProgressReporter};
