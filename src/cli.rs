//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth::{self, LocalSessionProvider, LocalUserDirectory, Session, SessionProvider};
use crate::batch::{Batch, BatchDefinition};
use crate::client::ProductionGmailClient;
use crate::config::Config;
use crate::engine::{BatchEngine, FailurePolicy};
use crate::error::{BatchError, Result};
use crate::fetcher::MessageFetcher;
use crate::label_manager::LabelManager;
use crate::models::Message;
use crate::process::ProcessRegistry;
use crate::query::{Filter, Query};
use crate::report::Report;

/// Environment variable consulted when `--api-key` is not given
pub const API_KEY_ENV: &str = "API_KEY";

#[derive(Parser, Debug)]
#[command(name = "gmail-batch")]
#[command(version = "0.1.0")]
#[command(about = "Run batches of operations over Gmail messages", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-batch/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Run a batch file
    Run {
        /// Batch definition (.json or .toml)
        #[arg(short, long)]
        batch: PathBuf,

        /// API key of a user in the users file (defaults to $API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Do not label processed messages
        #[arg(long)]
        no_mark: bool,

        /// Record failed operations in the report instead of aborting
        #[arg(long)]
        continue_on_error: bool,

        /// Write the report here (.json for JSON, anything else markdown)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List messages matching a filter
    List {
        /// Filter as key=value pairs, e.g. label=Receipts,subject="Your order"
        #[arg(short, long)]
        filter: String,

        /// Maximum number of messages
        #[arg(long)]
        max: Option<u32>,

        /// API key of a user in the users file (defaults to $API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Add or remove a label on every message matching a filter
    Label {
        /// Filter as key=value pairs
        #[arg(short, long)]
        filter: String,

        /// Label name; created if missing
        #[arg(short, long)]
        label: String,

        /// Remove the label instead of adding it
        #[arg(long)]
        remove: bool,

        /// Maximum number of messages
        #[arg(long)]
        max: Option<u32>,

        /// API key of a user in the users file (defaults to $API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        self.multi.suspend(|| println!("  ✓ {}", msg));
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }
}

/// `--api-key`, falling back to `$API_KEY`
fn api_key_or_env(api_key: Option<String>) -> Option<String> {
    api_key
        .or_else(|| env::var(API_KEY_ENV).ok())
        .filter(|key| !key.is_empty())
}

fn parse_filter(pairs: &str) -> Result<Filter> {
    let filter = Filter::parse_pairs(pairs);
    if filter.is_empty() {
        return Err(BatchError::ConfigError(format!(
            "Filter '{}' has no usable key=value terms",
            pairs
        )));
    }
    filter.validate()?;
    Ok(filter)
}

/// Open a session: the users-file entry for an API key, otherwise the
/// installed-app OAuth flow with cached tokens
pub async fn open_session(cli: &Cli, config: &Config, api_key: Option<String>) -> Result<Session> {
    let timeout = Duration::from_secs(config.store.request_timeout_secs);

    if let Some(api_key) = api_key_or_env(api_key) {
        let path = LocalUserDirectory::resolve_path(config.auth.users_file.as_deref());
        let directory = LocalUserDirectory::load(&path)?;
        let provider =
            LocalSessionProvider::new(directory, config.store.max_concurrent_requests, timeout);
        return provider.session_for_api_key(&api_key).await;
    }

    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    let (_, profile) = hub
        .users()
        .get_profile("me")
        .add_scope(auth::REQUIRED_SCOPES[0])
        .doit()
        .await?;
    let principal = profile.email_address.unwrap_or_else(|| "me".to_string());

    let client = ProductionGmailClient::new(hub, config.store.max_concurrent_requests, timeout);
    Ok(Session::new(principal, Arc::new(client)))
}

/// Options for `run` that override the configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub api_key: Option<String>,
    pub no_mark: bool,
    pub continue_on_error: bool,
    pub report: Option<PathBuf>,
}

/// Load, validate and run a batch file with the built-in processes
pub async fn run_batch(
    cli: &Cli,
    batch_path: &Path,
    options: RunOptions,
    multi: MultiProgress,
) -> Result<Report> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let config = Config::load(&cli.config).await?;
    let definition = BatchDefinition::load(batch_path)?;
    reporter.finish_spinner(
        &config_spinner,
        &format!(
            "Loaded batch '{}' ({} operations)",
            definition.name,
            definition.operations.len()
        ),
    );

    let auth_spinner = reporter.add_spinner("Authenticating...");
    let session = open_session(cli, &config, options.api_key).await?;
    reporter.finish_spinner(&auth_spinner, &format!("Authenticated as {}", session.principal));

    let registry = ProcessRegistry::with_builtins(session.client.clone());
    let batch = Batch::new(definition, &registry)?;

    let mut settings = config.execution_settings();
    if options.no_mark {
        settings.mark_processed = false;
    }
    if options.continue_on_error {
        settings.failure_policy = FailurePolicy::Continue;
    }

    let run_spinner = reporter.add_spinner(&format!("Running batch '{}'...", batch.name()));
    let engine = BatchEngine::new(settings);
    let report = match engine.run(&batch, &session).await {
        Ok(report) => report,
        Err(e) => {
            run_spinner.finish_and_clear();
            return Err(e);
        }
    };
    reporter.finish_spinner(
        &run_spinner,
        &format!("Batch '{}' complete ({} operations)", batch.name(), report.len()),
    );

    if let Some(path) = &options.report {
        report.save(path).await?;
        info!("Report written to {:?}", path);
    }

    Ok(report)
}

/// Fetch the messages matching a `key=value` filter
pub async fn list_messages(
    cli: &Cli,
    filter: &str,
    max: Option<u32>,
    api_key: Option<String>,
) -> Result<Vec<Message>> {
    let config = Config::load(&cli.config).await?;
    let filter = parse_filter(filter)?;
    let session = open_session(cli, &config, api_key).await?;

    let fetcher = MessageFetcher::new(session.client.clone(), config.execution.max_concurrent_messages)
        .with_emails_after(config.store.emails_after.clone());
    fetcher.fetch(&Query::from(filter), max).await
}

/// Add or remove a label on the messages matching a `key=value` filter
pub async fn label_messages(
    cli: &Cli,
    filter: &str,
    label: &str,
    remove: bool,
    max: Option<u32>,
    api_key: Option<String>,
) -> Result<usize> {
    let config = Config::load(&cli.config).await?;
    let filter = parse_filter(filter)?;
    let session = open_session(cli, &config, api_key).await?;

    let fetcher = MessageFetcher::new(session.client.clone(), config.execution.max_concurrent_messages)
        .with_emails_after(config.store.emails_after.clone());
    let labels = LabelManager::new(session.client.clone());

    labels
        .label_matching(&fetcher, &Query::from(filter), label, remove, max)
        .await
}
