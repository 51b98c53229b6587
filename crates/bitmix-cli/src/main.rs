//! bitmix CLI application
//!
//! Picks per-component bit-widths for a network described in a run file.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use bitmix_cli::RunFile;
use bitmix_cli::commands::{AllocateCommand, CheckCommand};
use bitmix_alloc::CancellationToken;
use bitmix_cli::exit::{EXIT_CANCELLED, EXIT_SUCCESS, exit_code};
use bitmix_common::LoggingConfig;
use tracing::{info, warn};

/// bitmix - mixed-precision bit-width allocation
#[derive(Parser)]
#[command(name = "bitmix")]
#[command(about = "Sensitivity-ranked mixed-precision bit-width allocation")]
#[command(long_about = r#"
bitmix probes every component of a network at every candidate bit-width,
ranks the probes by how little they hurt performance, and greedily lowers
precision while performance stays at or above the budget (gamma).

Examples:
  # Allocate and print a table
  bitmix allocate --config run.toml

  # JSON report, probes on 8 threads
  bitmix allocate --config run.toml --format json --threads 8

  # Validate a run file without probing
  bitmix check --config run.toml
"#)]
#[command(version)]
struct Cli {
    /// Run file path (TOML or JSON)
    #[arg(short, long, value_name = "PATH", global = true, env = "BITMIX_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, value_name = "FORMAT", global = true)]
    log_format: Option<String>,

    /// Concurrent sensitivity probes (0 = number of CPUs)
    #[arg(long, value_name = "N", global = true)]
    threads: Option<usize>,

    /// Generate shell completions
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sensitivity analysis and planning
    #[command(alias = "alloc")]
    Allocate(AllocateCommand),

    /// Validate a run file and preview the search space
    Check(CheckCommand),
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        generate_completions(shell);
        return;
    }

    let code = match run(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            // Logging may not be initialised yet, so report on stderr directly.
            eprintln!("Error: {e:?}");
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let path = cli
        .config
        .context("No run file given (use --config or BITMIX_CONFIG)")?;

    let mut run_file = RunFile::load(&path)?;
    if let Some(threads) = cli.threads {
        run_file.config.analysis.max_concurrency = threads;
    }
    if let Some(format) = cli.log_format {
        run_file.config.logging.format = format;
    }
    run_file.validate()?;
    setup_logging(&run_file.config.logging, cli.log_level.as_deref());

    match command {
        Commands::Allocate(cmd) => {
            let cancel = CancellationToken::new();
            spawn_signal_listener(cancel.clone())?;
            cmd.execute(&run_file, &cancel)
        }
        Commands::Check(cmd) => cmd.execute(&run_file),
    }
}

/// Cancel `token` on the first Ctrl+C or SIGTERM; a second one exits at once.
fn spawn_signal_listener(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("bitmix-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(e) = wait_for_shutdown().await {
                    warn!(error = %e, "Signal handling unavailable");
                    return;
                }
                info!("Interrupt received, cancelling at the next evaluation boundary");
                token.cancel();

                if wait_for_shutdown().await.is_ok() {
                    eprintln!("Interrupted again, exiting");
                    std::process::exit(EXIT_CANCELLED);
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Wait for shutdown signals
async fn wait_for_shutdown() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Setup logging based on configuration
fn setup_logging(config: &LoggingConfig, log_level_override: Option<&str>) {
    let level = log_level_override.unwrap_or(&config.level);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    match config.format.as_str() {
        "json" => {
            subscriber
                .json()
                .with_timer(tracing_subscriber::fmt::time::uptime())
                .init();
        }
        "compact" => {
            subscriber.compact().init();
        }
        _ => {
            subscriber.pretty().init();
        }
    }
}

/// Generate shell completions
fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
