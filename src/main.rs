use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waypoint_core::config::AppConfig;
use waypoint_core::event::EventBus;
use waypoint_core::types::{Namespace, RunId, RunOutcome, RunStatus};
use waypoint_dsl::{compile, CompileOptions, CompiledGraph, ProcessDescription};
use waypoint_engine::{Engine, EngineOptions, RunLogger, SimulatedCompletion, StepFactory};

/// Log records shown after a run.
const LOG_TAIL: usize = 10;

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Declarative process engine with sandboxed routing")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "waypoint.toml", global = true)]
    config: PathBuf,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a process description and report diagnostics
    Validate {
        /// Process file (.yaml, .yml, .toml or .json)
        process: PathBuf,
        /// Treat diagnostics as errors
        #[arg(long)]
        strict: bool,
    },
    /// Print the compiled routing table
    Graph {
        /// Process file (.yaml, .yml, .toml or .json)
        process: PathBuf,
    },
    /// Run a process with the built-in step kinds
    Run {
        /// Process file (.yaml, .yml, .toml or .json)
        process: PathBuf,
        /// JSON file holding the initial context object
        #[arg(long)]
        context: Option<PathBuf>,
        /// Step budget, overriding the process and config
        #[arg(long)]
        max_steps: Option<usize>,
        /// Print the whole outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "waypoint=debug,info"
    } else {
        "waypoint=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "waypoint", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Validate { process, strict } => {
            let strict = strict || config.engine.strict;
            let graph = load_graph(&process, strict)?;
            for diagnostic in graph.diagnostics() {
                println!("warning: {}", diagnostic);
            }
            println!(
                "{}: valid ({} steps, start '{}')",
                process.display(),
                graph.steps().len(),
                graph.start()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Graph { process } => {
            let graph = load_graph(&process, config.engine.strict)?;
            print!("{}", graph);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            process,
            context,
            max_steps,
            json,
        } => {
            let graph = Arc::new(load_graph(&process, config.engine.strict)?);
            let initial = match context {
                Some(path) => read_context(&path)?,
                None => Namespace::new(),
            };

            let mut options = EngineOptions::from_config(&config.engine);
            if let Some(limit) = max_steps {
                options = options.with_max_steps(limit);
            }
            let factory = StepFactory::new().with_completion(Arc::new(SimulatedCompletion));
            let event_bus = Arc::new(EventBus::default());
            let engine = Engine::build(graph, &factory, options)?.with_event_bus(event_bus.clone());

            let run_id = RunId::new();
            let logger = config.log.enabled.then(|| {
                let rx = event_bus.subscribe();
                let logger = RunLogger::from_config(&config.log);
                tokio::spawn(logger.run_with_receiver(rx, run_id.clone(), CancellationToken::new()))
            });

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Cancelling run...");
                cancel_clone.cancel();
            });

            let result = engine.run_with_id(run_id, initial, cancel).await;

            if let Some(handle) = logger {
                if let Ok(Some(path)) = handle.await {
                    info!(path = %path.display(), "Run log written");
                }
            }

            let outcome = result?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome)?;
            }

            Ok(match outcome.status {
                RunStatus::Completed { .. } => ExitCode::SUCCESS,
                RunStatus::Aborted { limit } => {
                    warn!(limit, "Run aborted by the step budget");
                    ExitCode::from(2)
                }
                RunStatus::Cancelled => ExitCode::from(2),
            })
        }
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn load_graph(path: &Path, strict: bool) -> anyhow::Result<CompiledGraph> {
    let desc = ProcessDescription::from_path(path)?;
    let graph = compile(&desc, CompileOptions { strict })?;
    Ok(graph)
}

fn read_context(path: &Path) -> anyhow::Result<Namespace> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading context file {}", path.display()))?;
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map),
        other => bail!(
            "context file {} must hold a JSON object, found {}",
            path.display(),
            other
        ),
    }
}

fn print_outcome(outcome: &RunOutcome) -> anyhow::Result<()> {
    println!("run:       {}", outcome.run_id);
    println!("status:    {}", serde_json::to_string(&outcome.status)?);
    println!("steps:     {} ({} ms)", outcome.steps_executed, outcome.elapsed_ms);
    println!("path:      {}", outcome.path.join(" -> "));
    if let Some(error) = outcome.recorded_error() {
        println!("error:     {}", error);
    }
    println!();
    println!("artifacts:");
    println!("{}", serde_json::to_string_pretty(outcome.artifacts())?);
    println!("quality:");
    println!("{}", serde_json::to_string_pretty(outcome.quality())?);

    let log = outcome.log();
    let tail = &log[log.len().saturating_sub(LOG_TAIL)..];
    println!("log (last {} of {}):", tail.len(), log.len());
    for record in tail {
        println!("  {}", serde_json::to_string(record)?);
    }
    Ok(())
}
