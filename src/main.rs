use anyhow::Result;
use clap::Parser;
use gmail_batch::cli::{self, Cli, Commands, RunOptions};
use gmail_batch::config::Config;
use gmail_batch::error::BatchError;
use gmail_batch::report::OperationOutcome;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("log buffer poisoned"))?;
        if !buffer.is_empty() {
            // Suspend rather than println so lines still appear when stderr is not a tty
            self.multi
                .suspend(|| std::io::stderr().write_all(&buffer))?;
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-batch --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // On Windows use ring; aws-lc-rs needs NASM/CMake there
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_batch=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_batch=info"))
    };

    let multi_progress = Arc::new(MultiProgress::new());
    let make_writer = MultiProgressMakeWriter {
        multi: Arc::clone(&multi_progress),
    };

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(make_writer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(make_writer)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    match &cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            if *force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub =
                gmail_batch::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache)
                    .await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            // Scope must match the cached token or a second consent flow starts
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(gmail_batch::auth::REQUIRED_SCOPES[0])
                .doit()
                .await?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Run {
            batch,
            api_key,
            no_mark,
            continue_on_error,
            report,
        } => {
            if let Some(parent) = cli.token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let options = RunOptions {
                api_key: api_key.clone(),
                no_mark: *no_mark,
                continue_on_error: *continue_on_error,
                report: report.clone(),
            };
            let report =
                cli::run_batch(&cli, batch, options, (*multi_progress).clone()).await?;

            println!("\n=== Batch '{}' ===", report.batch);
            println!("Run ID: {}", report.run_id);
            for (process, outcome) in &report.outcomes {
                match outcome {
                    OperationOutcome::Succeeded { value } => {
                        println!("  ✓ {:<24} {}", process, value)
                    }
                    OperationOutcome::Failed { reason } => {
                        println!("  ✗ {:<24} {}", process, reason)
                    }
                }
            }
            println!(
                "Completed in {} seconds ({} operations)",
                report.duration_seconds(),
                report.len()
            );

            if report.has_failures() {
                return Err(anyhow::anyhow!(
                    "Batch '{}' finished with failed operations",
                    report.batch
                ));
            }
            Ok(())
        }

        Commands::List {
            filter,
            max,
            api_key,
        } => {
            let messages = cli::list_messages(&cli, filter, *max, api_key.clone()).await?;

            println!("\n{:<18} {:<17} Subject", "ID", "Date");
            println!("{}", "-".repeat(72));
            for message in &messages {
                println!(
                    "{:<18} {:<17} {}",
                    message.id,
                    message.timestamp.format("%Y-%m-%d %H:%M"),
                    message.subject.as_deref().unwrap_or("(no subject)")
                );
            }
            println!("\n{} messages", messages.len());
            Ok(())
        }

        Commands::Label {
            filter,
            label,
            remove,
            max,
            api_key,
        } => {
            let count =
                cli::label_messages(&cli, filter, label, *remove, *max, api_key.clone()).await?;
            let verb = if *remove { "Removed" } else { "Applied" };
            println!("{} label '{}' on {} messages", verb, label, count);
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(anyhow::anyhow!(
                    "Config file already exists: {:?}. Use --force to overwrite",
                    output
                ));
            }

            Config::create_example(output).await?;
            println!("Created example configuration at: {:?}", output);
            Ok(())
        }
    }
}

fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    // Hints come from the innermost cause, beneath any operation wrappers
    let hint = error
        .chain()
        .find_map(|e| e.downcast_ref::<BatchError>())
        .and_then(BatchError::hint);
    if let Some(hint) = hint {
        eprintln!("\nHint: {}", hint);
    }
}
