use clap::{Parser, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use nomad_lite_agent::alloc::ChannelAllocParent;
use nomad_lite_agent::config::{ClientConfig, SandboxConfig};
use nomad_lite_agent::driver::ExecContext;
use nomad_lite_agent::shutdown::install_shutdown_handler;
use nomad_lite_agent::state::{self, TaskRunnerState};
use nomad_lite_agent::structs::{Resources, Task, TaskStatusUpdate};
use nomad_lite_agent::TaskRunner;

#[derive(Parser, Debug)]
#[command(name = "nomad-lite-agent")]
#[command(version)]
#[command(about = "Run and supervise a single allocation task")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a task under a task runner until it exits
    Run(RunArgs),

    /// Inspect persisted task runner state
    State {
        #[command(flatten)]
        task: TaskIdentityArgs,

        #[command(subcommand)]
        command: StateCommands,
    },
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct TaskIdentityArgs {
    /// Directory holding task runner snapshots
    #[arg(long, env = "NOMAD_LITE_STATE_DIR", default_value = "/var/lib/nomad-lite/state")]
    state_dir: PathBuf,

    /// Allocation ID the task belongs to
    #[arg(long)]
    alloc_id: String,

    /// Task name
    #[arg(long = "task")]
    task_name: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    task: TaskIdentityArgs,

    /// Directory under which allocation working directories are created
    #[arg(long, env = "NOMAD_LITE_ALLOC_DIR", default_value = "/var/lib/nomad-lite/alloc")]
    alloc_dir: PathBuf,

    /// Driver used to run the task
    #[arg(long, default_value = "exec")]
    driver: String,

    /// Command to run (exec: program, docker: shell command)
    #[arg(long)]
    command: Option<String>,

    /// Arguments for the exec driver (whitespace separated)
    #[arg(long)]
    args: Option<String>,

    /// Docker image (defaults to the sandbox image)
    #[arg(long)]
    image: Option<String>,

    /// Environment variables, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// CPU limit in cores (e.g. "0.5")
    #[arg(long)]
    cpu: Option<String>,

    /// Memory limit in MB
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Restore the task specification from the state directory instead of
    /// the command line. The task is started fresh.
    #[arg(long)]
    restore: bool,
}

// =============================================================================
// State Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum StateCommands {
    /// Print the snapshot path for the task
    Path,
    /// Print the persisted task specification
    Show,
    /// Remove the persisted snapshot
    Erase,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn task_from_args(args: &RunArgs) -> Task {
    let mut task = Task::new(args.task.task_name.clone(), args.driver.clone());
    if let Some(command) = &args.command {
        task = task.with_config("command", command.clone());
    }
    if let Some(extra) = &args.args {
        task = task.with_config("args", extra.clone());
    }
    if let Some(image) = &args.image {
        task = task.with_config("image", image.clone());
    }
    task.env = args.env.iter().cloned().collect::<BTreeMap<_, _>>();
    if args.cpu.is_some() || args.memory_mb.is_some() {
        task = task.with_resources(Resources {
            cpu: args.cpu.clone(),
            memory_mb: args.memory_mb,
        });
    }
    task
}

fn print_status(update: &TaskStatusUpdate, output: &OutputFormat) {
    match output {
        OutputFormat::Json => match serde_json::to_string(update) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "Failed to encode status update"),
        },
        OutputFormat::Table => {
            println!(
                "{:<25} {:<16} {:<8} {}",
                update.at.format("%Y-%m-%dT%H:%M:%S%.3f"),
                update.task_name,
                update.status,
                update.description
            );
        }
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(
        ClientConfig::new(args.task.state_dir.clone())
            .with_alloc_dir(args.alloc_dir.clone())
            .with_sandbox(SandboxConfig::default()),
    );
    let alloc_id = args.task.alloc_id.clone();
    let ctx = ExecContext::new(alloc_id.clone(), config.alloc_dir.join(&alloc_id));
    let (parent, mut status_rx) = ChannelAllocParent::new(alloc_id.clone());

    let mut runner = TaskRunner::new(config, Arc::new(parent), ctx, task_from_args(&args));
    if args.restore {
        runner.restore_state().await?;
        tracing::info!(
            task = %runner.task().name,
            alloc_id = %alloc_id,
            "Restored task, starting it fresh"
        );
    }
    runner.save_state().await?;

    let handle = runner.handle();
    let shutdown = install_shutdown_handler();
    let run = tokio::spawn(runner.run());

    let mut done = handle.wait_ch();
    loop {
        tokio::select! {
            Some(update) = status_rx.recv() => {
                print_status(&update, &args.task.output);
            }
            _ = shutdown.cancelled(), if !handle.is_destroy_requested() => {
                handle.destroy();
            }
            result = done.wait_for(|finished| *finished) => {
                if result.is_err() {
                    tracing::warn!("Task runner dropped its completion signal");
                }
                break;
            }
        }
    }

    // Statuses sent just before completion
    while let Ok(update) = status_rx.try_recv() {
        print_status(&update, &args.task.output);
    }
    run.await?;
    Ok(())
}

async fn handle_state(
    identity: TaskIdentityArgs,
    command: StateCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = state::state_file_path(&identity.state_dir, &identity.alloc_id, &identity.task_name);

    match command {
        StateCommands::Path => println!("{}", path.display()),
        StateCommands::Show => {
            let snap: TaskRunnerState = state::restore_state(&path).await?;
            match identity.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snap)?),
                OutputFormat::Table => {
                    let task = &snap.task;
                    println!("Task:   {}", task.name);
                    println!("Driver: {}", task.driver);
                    println!("Path:   {}", path.display());
                    if !task.config.is_empty() {
                        println!();
                        println!("{:<12} VALUE", "CONFIG");
                        println!("{}", "-".repeat(40));
                        for (key, value) in &task.config {
                            println!("{:<12} {}", key, value);
                        }
                    }
                    if !task.env.is_empty() {
                        println!();
                        println!("{:<12} VALUE", "ENV");
                        println!("{}", "-".repeat(40));
                        for (key, value) in &task.env {
                            println!("{:<12} {}", key, value);
                        }
                    }
                }
            }
        }
        StateCommands::Erase => {
            state::erase_state(&path).await?;
            println!("Erased {}", path.display());
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => handle_run(run_args).await?,
        Commands::State { task, command } => handle_state(task, command).await?,
    }

    Ok(())
}
