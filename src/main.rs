//! Runbooks - run executable runbooks from the terminal.
//!
//! Thin CLI over the execution and dependency core: validate a runbook, run
//! its blocks in a persistent session, or watch it for live reload.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use runbooks::core::{Config, OutputLine, OutputRegistry, SessionManager};
use runbooks::runbook::{lint_runbook, parse_runbook, RunSummary, Runbook, RunbookRunner};
use runbooks::watch::resolve_runbook_path;
use runbooks::{BlockStatus, DependencyGraph, ExecutionRecord, RunError};

/// Run executable runbooks with a persistent shell session
#[derive(Parser)]
#[command(name = "runbooks")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a runbook and show its dependency graph
    Check {
        /// Runbook file or directory containing one
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run blocks of a runbook in one session
    Run {
        /// Runbook file or directory containing one
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Run only these blocks, in the given order
        #[arg(short, long = "block", value_name = "ID")]
        blocks: Vec<String>,

        /// Variable assignments (key=value)
        #[arg(long, value_name = "KEY=VALUE")]
        var: Vec<String>,

        /// Default timeout per block in seconds
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Watch a runbook and print a reload event for every change
    #[cfg(feature = "file-watch")]
    Watch {
        /// Runbook file or directory containing one
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Debounce window in milliseconds
        #[arg(long, value_name = "MS")]
        debounce_ms: Option<u64>,
    },

    /// Show the effective configuration
    Config {
        /// Runbook directory to resolve the config for
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Show config file path
        #[arg(long)]
        path_only: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Check { path } => cmd_check(&path),
        Commands::Run { path, blocks, var, timeout, format } => {
            cmd_run(&path, &blocks, &var, timeout, format)
        }
        #[cfg(feature = "file-watch")]
        Commands::Watch { path, debounce_ms } => cmd_watch(&path, debounce_ms),
        Commands::Config { path, path_only } => cmd_config(&path, path_only),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

/// Resolve and parse a runbook, returning it with its directory.
fn load_runbook(path: &Path) -> Result<(Runbook, PathBuf)> {
    let file = resolve_runbook_path(path)?;
    let runbook =
        parse_runbook(&file).with_context(|| format!("Failed to load {}", file.display()))?;
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok((runbook, dir))
}

/// Parse `key=value` assignments.
fn parse_vars(vars: &[String]) -> Result<HashMap<String, String>> {
    vars.iter()
        .map(|assignment| {
            assignment
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("Invalid variable '{assignment}', expected KEY=VALUE"))
        })
        .collect()
}

/// Validate a runbook.
fn cmd_check(path: &Path) -> Result<()> {
    let (runbook, _) = load_runbook(path)?;
    let graph = DependencyGraph::build(runbook.block_bodies());
    let report = lint_runbook(&runbook);

    println!("Runbook: {}", runbook.name);
    if let Some(ref desc) = runbook.description {
        println!("Description: {desc}");
    }
    println!("Blocks: {}\n", runbook.block_count());

    for (i, block) in runbook.blocks.iter().enumerate() {
        let deps = graph.dependencies(&block.id);
        if deps.is_empty() {
            println!("  {}. {} [{}]", i + 1, block.id, block.kind);
        } else {
            println!("  {}. {} [{}] <- {}", i + 1, block.id, block.kind, deps.join(", "));
        }
    }

    for warning in &report.warnings {
        println!("\nwarning: {warning}");
    }

    if let Some(ref cycle) = report.cycle {
        anyhow::bail!("{cycle}");
    }

    println!("\nOK");
    Ok(())
}

/// Run a runbook.
fn cmd_run(
    path: &Path,
    blocks: &[String],
    vars: &[String],
    timeout: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let (runbook, dir) = load_runbook(path)?;

    let mut config = Config::load(&dir)?;
    if let Some(secs) = timeout {
        config.session.timeout_secs = secs;
    }

    let registry = Arc::new(OutputRegistry::new());
    let manager = SessionManager::open(&dir, &config, registry)?;
    let mut runner = RunbookRunner::new(runbook, manager);
    runner.set_variables(parse_vars(vars)?);

    let abort = runner.abort_handle();
    ctrlc::set_handler(move || abort.abort()).context("Failed to install Ctrl-C handler")?;

    let text = format == OutputFormat::Text;
    let mut print_line = |block: &str, line: &OutputLine| {
        if text {
            let stream = if line.is_stderr { "!" } else { "|" };
            println!("[{block}] {stream} {}", line.line);
        }
    };

    let summary = if blocks.is_empty() {
        runner.run_all_streaming(|block, line| print_line(block, line))?
    } else {
        run_selected(&runner, blocks, &mut print_line)?
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summary)?;
            println!("{json}");
        }
        OutputFormat::Text => print_summary(&summary),
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Run explicitly selected blocks, stopping at the first one that cannot run or fails.
fn run_selected(
    runner: &RunbookRunner,
    blocks: &[String],
    print_line: &mut impl FnMut(&str, &OutputLine),
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let abort = runner.abort_handle();

    for id in blocks {
        if abort.is_aborted() {
            summary.cancelled = true;
            break;
        }
        match runner.run_block_streaming(id, |line| print_line(id, line)) {
            Ok(record) => {
                let succeeded = record.success();
                summary.executed.push(record);
                if !succeeded {
                    summary.failed = Some(id.clone());
                    break;
                }
            }
            Err(RunError::Blocked { block, missing }) => {
                summary.blocked = Some(runbooks::runbook::BlockedBlock { block_id: block, missing });
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    println!();
    for record in &summary.executed {
        println!("{}", format_record(record));
    }

    if let Some(ref blocked) = summary.blocked {
        println!("  blocked  {} (waiting on {})", blocked.block_id, blocked.missing.join(", "));
    }

    if summary.cancelled {
        println!("\nRun cancelled");
    }

    let warnings = summary.warning_count();
    if summary.is_success() {
        if warnings > 0 {
            println!("\nRunbook completed with {warnings} warning(s)");
        } else {
            println!("\nRunbook completed successfully!");
        }
    }
}

fn format_record(record: &ExecutionRecord) -> String {
    let label = match record.status {
        BlockStatus::Success => "ok",
        BlockStatus::Warning => "warn",
        BlockStatus::Failure => "FAIL",
        BlockStatus::Timeout => "TIMEOUT",
        BlockStatus::Cancelled => "cancelled",
    };
    let mut line = format!("  {label:<8} {} ({}ms)", record.block_id, record.duration().as_millis());
    if !record.outputs.is_empty() {
        let mut names: Vec<&str> = record.outputs.keys().map(String::as_str).collect();
        names.sort_unstable();
        line.push_str(&format!(" outputs: {}", names.join(", ")));
    }
    line
}

/// Watch a runbook and print SSE frames.
#[cfg(feature = "file-watch")]
fn cmd_watch(path: &Path, debounce_ms: Option<u64>) -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::RecvTimeoutError;

    use runbooks::watch::{FileWatcher, ReloadHub};

    let file = resolve_runbook_path(path)?;
    let dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let config = Config::load(dir)?;
    let debounce = debounce_ms.map_or_else(|| config.debounce(), Duration::from_millis);

    let hub = Arc::new(ReloadHub::new(config.watch.subscriber_buffer));
    let events = hub.subscribe();
    let watcher = FileWatcher::new(&[file.clone()], debounce, Arc::clone(&hub))?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    eprintln!("Watching {} (Ctrl-C to stop)", file.display());

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => {
                match parse_runbook(&file) {
                    Ok(runbook) => {
                        tracing::info!(blocks = runbook.block_count(), "Runbook reloaded");
                    }
                    Err(e) => tracing::warn!(error = %e, "Reloaded runbook is invalid"),
                }
                print!("{}", event.to_sse());
                io::stdout().flush()?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    watcher.stop();
    Ok(())
}

/// Show configuration.
fn cmd_config(path: &Path, path_only: bool) -> Result<()> {
    if path_only {
        let local = path.join(".runbooks.toml");
        if local.exists() {
            println!("{}", local.display());
        } else if let Some(dir) = Config::config_dir() {
            println!("{}", dir.join("config.toml").display());
        }
        return Ok(());
    }

    let config = Config::load(path)?;
    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "runbooks", &mut io::stdout());
}
