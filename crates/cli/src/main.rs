use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqterm_engine::{
    HttpRequestExecutor, RunControl, RunReport, RunTarget, StoreHistoryRecorder, WorkflowSession, drive_workflow_run, parse_document_file,
    render_definition, validate_workflow,
};
use reqterm_util::{JsonRunHistory, RunHistoryStore, UserSettings};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "reqterm", version, about = "Run request workflows from the terminal")]
struct Cli {
    /// Override the run history file location.
    #[arg(long, global = true, value_name = "PATH")]
    history_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate and run a workflow.
    Run {
        file: PathBuf,
        #[arg(long, short)]
        workflow: String,
        #[arg(long, short)]
        env: Option<String>,
    },
    /// Loop a single request over its own for-each items.
    ForEach {
        file: PathBuf,
        #[arg(long, short)]
        request: String,
        #[arg(long, short)]
        env: Option<String>,
    },
    /// Validate every workflow in a document.
    Validate { file: PathBuf },
    /// Print a workflow in directive-comment form.
    Show {
        file: PathBuf,
        #[arg(long, short)]
        workflow: String,
    },
    /// List recorded workflow runs, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only show runs whose workflow identifier contains this text.
        #[arg(long)]
        workflow: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let settings = UserSettings::load().context("failed to load user settings")?;

    match cli.command {
        Command::Run { file, workflow, env } => {
            run_target(&settings, cli.history_path, &file, RunTarget::Workflow(workflow), env).await
        }
        Command::ForEach { file, request, env } => {
            run_target(&settings, cli.history_path, &file, RunTarget::ForEach(request), env).await
        }
        Command::Validate { file } => validate_document(&file),
        Command::Show { file, workflow } => show_workflow(&file, &workflow),
        Command::History { limit, workflow } => show_history(&settings, cli.history_path, limit, workflow.as_deref()),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing::subscriber::set_global_default(log_subscriber(&filter));
}

/// Stderr subscriber governed only by `filter`, so `RUST_LOG=debug` reaches engine events.
fn log_subscriber(filter: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
}

async fn run_target(
    settings: &UserSettings,
    history_path: Option<PathBuf>,
    file: &Path,
    target: RunTarget,
    env: Option<String>,
) -> Result<ExitCode> {
    let document = parse_document_file(file)?;
    let environment = env.or_else(|| settings.default_environment()).unwrap_or_default();
    let history = JsonRunHistory::new(history_path, settings.history_limit()).context("failed to open run history")?;
    let executor = Arc::new(HttpRequestExecutor::new(settings.request_timeout())?);

    let mut session = WorkflowSession::new(Arc::new(document)).with_history(Arc::new(StoreHistoryRecorder::new(Arc::new(history))));

    let (control_tx, control_rx) = unbounded_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, canceling after the in-flight request");
            let _ = control_tx.send(RunControl::Cancel {
                reason: Some("interrupted".to_string()),
            });
        }
    });

    let report = drive_workflow_run(&mut session, target, &environment, executor, control_rx).await?;
    print_report(&report);
    Ok(if report.succeeded() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_report(report: &RunReport) {
    println!("{}", report.report);
    println!();
    println!("{}", report.summary);
}

fn validate_document(file: &Path) -> Result<ExitCode> {
    let document = parse_document_file(file)?;
    let requests = document.request_index();
    let mut failures = 0usize;

    for workflow in &document.workflows {
        match validate_workflow(workflow, &requests) {
            Ok(()) => println!("ok      {}", workflow.name),
            Err(error) => {
                failures += 1;
                println!("invalid {error}");
            }
        }
    }
    info!(workflows = document.workflows.len(), failures, "validation finished");
    Ok(if failures == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn show_workflow(file: &Path, name: &str) -> Result<ExitCode> {
    let document = parse_document_file(file)?;
    let workflow = document
        .find_workflow(name)
        .with_context(|| format!("workflow '{name}' not found in {}", file.display()))?;
    println!("{}", render_definition(workflow, &document.request_index()));
    Ok(ExitCode::SUCCESS)
}

fn show_history(settings: &UserSettings, history_path: Option<PathBuf>, limit: usize, workflow: Option<&str>) -> Result<ExitCode> {
    let history = JsonRunHistory::new(history_path, settings.history_limit()).context("failed to open run history")?;
    let entries = history.entries()?;
    let matching = entries
        .iter()
        .filter(|entry| workflow.is_none_or(|needle| entry.workflow_id.contains(needle)))
        .take(limit);

    for entry in matching {
        println!(
            "{}  {:<9} {:>6} ms  {}",
            entry.executed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.outcome.as_str(),
            entry.duration_ms,
            entry.summary
        );
    }
    Ok(ExitCode::SUCCESS)
}
