use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::context::StdoutConsole;
use crate::controller::{self, RunOptions};
use crate::interpreter::instrument::{count_step_points, Granularity};
use crate::interpreter::Val;

#[derive(Parser)]
#[command(name = "stepwise")]
#[command(about = "Stepwise - run programs one observable step at a time", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program
    Run {
        /// Program source file
        file: PathBuf,

        /// Checkpoint density: explicit, boundaries, statements
        #[arg(long)]
        granularity: Option<Granularity>,

        /// Delay for steps that don't name one, in milliseconds
        #[arg(long = "delay-ms")]
        delay_ms: Option<u64>,

        /// Namespace binding as KEY=JSON (repeatable)
        #[arg(long = "context", value_parser = parse_binding)]
        context: Vec<(String, Val)>,

        /// Lower to the baseline dialect before running
        #[arg(long)]
        baseline: bool,

        /// Run synchronously, without suspending
        #[arg(long)]
        sync: bool,

        /// Print every step event as a JSON line
        #[arg(long)]
        trace_steps: bool,
    },

    /// Parse, validate and instrument a program without running it
    Check {
        /// Program source file
        file: PathBuf,

        #[arg(long)]
        granularity: Option<Granularity>,

        #[arg(long)]
        baseline: bool,

        /// Print the instrumented program as JSON
        #[arg(long)]
        emit: bool,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load configuration before anything else so errors surface first
    let config = Config::builder()
        .config_path(cli.config.map(PathBuf::from))
        .build()?;
    init_tracing(&config.log_filter);

    match cli.command {
        Commands::Run {
            file,
            granularity,
            delay_ms,
            context,
            baseline,
            sync,
            trace_steps,
        } => {
            let source = read_source(&file)?;

            let mut options: RunOptions = config.run_options().console(Arc::new(StdoutConsole));
            if let Some(granularity) = granularity {
                options = options.granularity(granularity);
            }
            if let Some(ms) = delay_ms {
                options = options.step_delay(Some(Duration::from_millis(ms)));
            }
            for (name, value) in context {
                options = options.bind(name, value);
            }
            if baseline {
                options = options.transform_to_baseline_dialect(true);
            }
            if sync {
                options = options.synchronous(true);
            }
            if trace_steps {
                options = options.on_step(|event| match serde_json::to_string(event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize step event"),
                });
            }

            let controller = controller::run(&source, options)
                .with_context(|| format!("Failed to load {}", file.display()))?;

            // Ctrl-C stops the run cleanly
            let stopper = controller.clone();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stopper.stop();
                }
            });

            let value = controller.empty_stack().await;
            let end = controller.execution_end().await;
            interrupt.abort();

            info!(run_id = %controller.run_id(), state = %controller.state(), "run finished");
            let value = value.map_err(|e| anyhow!("{}", e))?;
            end.map_err(|e| anyhow!("{}", e))?;
            if value != Val::Null {
                println!("{}", value);
            }
        }

        Commands::Check {
            file,
            granularity,
            baseline,
            emit,
        } => {
            let source = read_source(&file)?;
            let granularity = granularity.unwrap_or(config.granularity);
            let program = controller::load(&source, granularity, baseline || config.baseline_dialect)
                .with_context(|| format!("Failed to load {}", file.display()))?;

            if emit {
                let json = serde_json::to_string_pretty(&program)
                    .context("Failed to serialize program")?;
                println!("{}", json);
            } else {
                println!(
                    "{}: ok ({} statements, {} step points, granularity {})",
                    file.display(),
                    program.body.len(),
                    count_step_points(&program),
                    granularity
                );
            }
        }
    }

    Ok(())
}

fn read_source(file: &PathBuf) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

/// Parse `KEY=JSON`; a value that isn't valid JSON is taken as a string
fn parse_binding(raw: &str) -> Result<(String, Val), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err("Binding name can't be empty".to_string());
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Val::from)
        .unwrap_or_else(|_| Val::Str(value.to_string()));
    Ok((key.to_string(), value))
}

/// Install the global subscriber; `RUST_LOG` wins over the configured filter
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Already installed (e.g. by an embedding application) is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
