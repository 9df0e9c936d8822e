//! caravan - a dependency-ordered container task runner.
//!
//! Usage:
//!   caravan run <task-file>       Run the task defined in the file
//!   caravan validate <task-file>  Validate a task definition without running
//!   caravan list <task-file>      Show the task's containers and dependencies

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use caravan::{
    CliEngine, ContainerEngine, ContainerGraph, EventBus, EventHandler, RunAsCurrentUserProvider,
    SystemInfo, TaskEvent, TaskRun, load_task_from_file,
};

/// caravan - a dependency-ordered container task runner
#[derive(Parser)]
#[command(name = "caravan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the task defined in a task file
    Run {
        /// Path to the task YAML file
        #[arg(value_name = "TASK_FILE")]
        task_file: PathBuf,

        /// Maximum concurrent steps (default: 4)
        #[arg(short = 'p', long, default_value = "4")]
        max_parallel: usize,

        /// Engine binary to invoke (e.g. docker or podman)
        #[arg(long, default_value = "docker")]
        engine: String,
    },

    /// Validate a task definition without running it
    Validate {
        /// Path to the task YAML file
        #[arg(value_name = "TASK_FILE")]
        task_file: PathBuf,
    },

    /// Show the task's containers and dependencies
    List {
        /// Path to the task YAML file
        #[arg(value_name = "TASK_FILE")]
        task_file: PathBuf,
    },
}

/// Event handler that logs every run event.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &TaskEvent) {
        if event.is_failure() {
            error!("{}", event);
        } else {
            info!("{}", event);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            task_file,
            max_parallel,
            engine,
        } => run_task(task_file, max_parallel, engine).await,
        Commands::Validate { task_file } => validate_task(task_file),
        Commands::List { task_file } => list_task(task_file),
    }
}

/// Run a task to completion, mirroring the task container's exit code.
async fn run_task(
    task_file: PathBuf,
    max_parallel: usize,
    engine_binary: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_task_from_file(&task_file)?;
    let graph = ContainerGraph::build(config.to_containers()?)?;

    info!(
        "Running task '{}' ({} container(s), task container '{}')",
        config.name,
        graph.len(),
        graph.task_container()
    );

    let engine = Arc::new(CliEngine::with_binary(engine_binary)) as Arc<dyn ContainerEngine>;
    let system_info = SystemInfo::capture().await?;
    let provider = RunAsCurrentUserProvider::new(system_info);

    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(LoggingHandler)).await;

    let run = TaskRun::new(graph, engine, provider, bus).with_max_concurrency(max_parallel);
    let (handle, mut run_task) = run.start();

    let outcome = tokio::select! {
        outcome = &mut run_task => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, cleaning up...");
            handle.cancel();
            (&mut run_task).await?
        }
    };

    for failure in &outcome.failures {
        error!("{}", failure);
    }

    if outcome.success() {
        info!("Task completed successfully");
    } else {
        error!("Task failed");
    }

    match outcome.exit_code {
        Some(code) => std::process::exit(code as i32),
        None if outcome.success() => Ok(()),
        None => std::process::exit(1),
    }
}

/// Validate a task definition without running it.
fn validate_task(task_file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_task_from_file(&task_file)?;
    let graph = ContainerGraph::build(config.to_containers()?)?;

    info!(
        "Task '{}' is valid: {} container(s), task container '{}'",
        config.name,
        graph.len(),
        graph.task_container()
    );
    Ok(())
}

/// Show the task's containers and their dependencies.
fn list_task(task_file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_task_from_file(&task_file)?;
    let graph = ContainerGraph::build(config.to_containers()?)?;

    println!("Task: {}", config.name);
    if let Some(description) = &config.description {
        println!("  {}", description);
    }
    println!();

    for node in graph.nodes() {
        let container = node.container();
        let marker = if graph.is_task_container(container.name()) {
            " (task container)"
        } else {
            ""
        };
        println!("{}{}", container.name(), marker);

        if !node.dependencies().is_empty() {
            let mut names: Vec<&str> = node
                .dependencies()
                .iter()
                .map(|name| name.as_str())
                .collect();
            names.sort_unstable();
            println!("  depends on: {}", names.join(", "));
        }
    }

    Ok(())
}
