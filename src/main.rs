//! task-compose: launch interdependent local processes in dependency order.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads and validates configuration, and wires the `up`, `down`, `check`,
//! `init` and `version` subcommands to the orchestration engine.

mod config;
mod events;
mod health;
mod node;
mod output;
mod process;
mod registry;
mod runner;
mod shutdown;
mod task;
#[cfg(test)]
mod testutil;
mod validate;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, DEFAULT_FILE_NAMES};
use crate::health::HealthChecker;
use crate::node::RunContext;
use crate::output::Reporter;
use crate::registry::{ProcessRegistry, REGISTRY_FILE};
use crate::runner::Orchestrator;
use crate::shutdown::ShutdownError;
use crate::task::TaskSpec;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "task-compose",
    version,
    about = "Launch interdependent local tasks in dependency order with health checks",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to the configuration file (default: task-compose.toml or task-compose.yaml).
    #[arg(short = 'f', long = "configfile", global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute tasks according to the configuration file.
    Up {
        /// Launch tasks in the background and return once they have settled.
        #[arg(short, long)]
        detach: bool,
    },
    /// Kill the task processes started by the previous `up`.
    Down,
    /// Validate the configuration file.
    Check {
        /// Print the parsed tasks.
        #[arg(long)]
        detail: bool,
    },
    /// Generate a minimal configuration file in the current directory.
    Init {
        /// File name to generate (a .yaml/.yml name produces YAML).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show version information.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    match cli.command {
        Commands::Up { detach } => {
            let (_, specs) = load_specs(cli.config.as_deref(), &cwd)?;
            up(specs, &cwd, detach).await
        }
        Commands::Down => down(&cwd).await,
        Commands::Check { detail } => check(cli.config.as_deref(), &cwd, detail),
        Commands::Init { output } => {
            let name = output.unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_NAMES[0]));
            let path = cwd.join(name);
            config::write_template(&path)?;
            info!("generated {}", path.display());
            Ok(())
        }
        Commands::Version => {
            println!("task-compose {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn load_specs(config_path: Option<&Path>, cwd: &Path) -> Result<(Config, Vec<TaskSpec>)> {
    let path = match config_path {
        Some(path) => cwd.join(path),
        None => config::default_config_path(cwd).ok_or_else(|| {
            anyhow!(
                "no configuration file found in {} (expected one of {})",
                cwd.display(),
                DEFAULT_FILE_NAMES.join(", ")
            )
        })?,
    };
    info!("using config file {}", path.display());
    let config = config::load_config(&path)?;
    let specs = config.to_specs()?;
    Ok((config, specs))
}

fn check(config_path: Option<&Path>, cwd: &Path, detail: bool) -> Result<()> {
    let (config, specs) = load_specs(config_path, cwd)?;
    validate::validate(&specs).context("error validating config")?;
    if specs.is_empty() {
        warn!("no tasks defined in the configuration");
        return Ok(());
    }
    if detail {
        info!("found {} tasks in config", specs.len());
        println!("{}", serde_json::to_string_pretty(&config.tasks)?);
    }
    info!("configuration check success");
    Ok(())
}

async fn up(specs: Vec<TaskSpec>, cwd: &Path, detach: bool) -> Result<()> {
    if specs.is_empty() {
        bail!("no tasks defined in the configuration");
    }
    let orchestrator = Orchestrator::new(&specs).context("error validating config")?;

    let names: Vec<String> = orchestrator
        .nodes()
        .iter()
        .map(|node| node.name().to_string())
        .collect();
    let (event_tx, event_rx) = mpsc::channel(256);
    let reporter = Reporter::new(&names, std::io::stdout().is_terminal()).spawn(event_rx);

    let registry = Arc::new(Mutex::new(ProcessRegistry::in_dir(cwd)));
    let ctx = RunContext {
        events: event_tx,
        registry: Arc::clone(&registry),
        checker: HealthChecker::new()?,
        detach,
    };

    let summary = if detach {
        Some(orchestrator.run(ctx).await)
    } else {
        tokio::select! {
            summary = orchestrator.run(ctx) => Some(summary),
            _ = shutdown_signal() => None,
        }
    };

    let result = match &summary {
        Some(summary) if summary.all_healthy() => Ok(()),
        Some(summary) => Err(anyhow!(
            "tasks terminated: {}",
            summary.terminated().join(", ")
        )),
        None => {
            debug!(statuses = ?orchestrator.statuses(), "interrupted during startup");
            Err(anyhow!("interrupted before all tasks settled"))
        }
    };

    if !detach {
        if summary.is_some() {
            info!("all tasks settled; press Ctrl-C to stop");
            shutdown_signal().await;
        }
        stop_all(&orchestrator, &registry).await;
    }

    // Stream readers finish once the killed children close their pipes.
    let _ = tokio::time::timeout(Duration::from_secs(1), reporter).await;
    result
}

// Kills every node, then deletes the registry: its pids are dead and may be reused.
async fn stop_all(orchestrator: &Orchestrator, registry: &Mutex<ProcessRegistry>) {
    info!("stopping tasks");
    orchestrator.kill_all().await;
    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(err) = registry.clear() {
        warn!(error = %err, "failed to remove process registry");
    }
}

async fn down(cwd: &Path) -> Result<()> {
    let path = cwd.join(REGISTRY_FILE);
    if !path.exists() {
        warn!("no process registry found at {}", path.display());
        return Ok(());
    }
    let records = ProcessRegistry::load(&path)?;
    let report = shutdown::shutdown(records).await;

    let kill_failures = report
        .errors
        .iter()
        .filter(|err| matches!(err, ShutdownError::Kill { .. }))
        .count();
    if kill_failures > 0 {
        bail!("{} process(es) could not be killed", kill_failures);
    }
    std::fs::remove_file(&path)
        .with_context(|| format!("failed to remove {}", path.display()))?;
    info!("stopped {} task(s)", report.killed.len());
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_config_flag_after_subcommand() {
        let cli = Cli::parse_from(["task-compose", "up", "-d", "-f", "stack.yaml"]);
        assert!(matches!(cli.command, Commands::Up { detach: true }));
        assert_eq!(cli.config, Some(PathBuf::from("stack.yaml")));
    }

    #[test]
    fn load_specs_rejects_unknown_dependency_at_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("task-compose.toml"),
            "[[tasks]]\nname = \"api\"\nexecutable = \"true\"\ndepends_on = [\"db\"]\n",
        )
        .unwrap();
        assert!(load_specs(None, dir.path()).is_ok());
        assert!(check(None, dir.path(), false).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn foreground_stop_kills_tasks_and_drops_registry() {
        let dir = tempfile::tempdir().unwrap();
        let specs = vec![crate::testutil::make_spec("sleeper", &["sleep", "30"], &[], None)];
        let orchestrator = Orchestrator::new(&specs).unwrap();
        let registry = Arc::new(Mutex::new(ProcessRegistry::in_dir(dir.path())));
        let (events, _rx) = mpsc::channel(256);
        let ctx = RunContext {
            events,
            registry: Arc::clone(&registry),
            checker: HealthChecker::new().unwrap(),
            detach: true,
        };

        let summary = orchestrator.run(ctx).await;
        assert!(summary.all_healthy());
        let path = dir.path().join(REGISTRY_FILE);
        assert_eq!(ProcessRegistry::load(&path).unwrap().len(), 1);

        stop_all(&orchestrator, &registry).await;
        assert!(!path.exists());
        assert!(!orchestrator.node("sleeper").unwrap().is_running().await);
    }

    #[tokio::test]
    async fn down_without_registry_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert!(down(dir.path()).await.is_ok());
    }
}
