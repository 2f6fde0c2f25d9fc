//! Runs a small allocation of exec tasks locally.
//!
//! Starts two task runners sharing one allocation, pushes an update to one,
//! destroys the other, and prints every status transition.
//!
//! ```text
//! cargo run --example local_alloc -- --state-dir /tmp/nomad-lite
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nomad_lite_agent::alloc::ChannelAllocParent;
use nomad_lite_agent::config::ClientConfig;
use nomad_lite_agent::driver::ExecContext;
use nomad_lite_agent::structs::Task;
use nomad_lite_agent::TaskRunner;

#[derive(Parser, Debug)]
#[command(name = "local-alloc")]
#[command(about = "Run a local allocation of exec tasks")]
struct Args {
    /// Root directory for state and allocation directories
    #[arg(long, default_value = "/tmp/nomad-lite")]
    state_dir: PathBuf,

    /// Allocation ID
    #[arg(long, default_value = "local-alloc")]
    alloc_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = Arc::new(
        ClientConfig::new(args.state_dir.join("state"))
            .with_alloc_dir(args.state_dir.join("alloc")),
    );
    let ctx = ExecContext::new(args.alloc_id.clone(), config.alloc_dir.join(&args.alloc_id));
    let (parent, mut status_rx) = ChannelAllocParent::new(args.alloc_id.clone());
    let parent = Arc::new(parent);

    let web = Task::new("web", "exec")
        .with_config("command", "sleep")
        .with_config("args", "2");
    let worker = Task::new("worker", "exec")
        .with_config("command", "sleep")
        .with_config("args", "60");

    let web_runner = TaskRunner::new(config.clone(), parent.clone(), ctx.clone(), web.clone());
    let worker_runner = TaskRunner::new(config, parent, ctx, worker);
    web_runner.save_state().await?;
    worker_runner.save_state().await?;

    let web_handle = web_runner.handle();
    let worker_handle = worker_runner.handle();
    tokio::spawn(web_runner.run());
    tokio::spawn(worker_runner.run());

    web_handle.update(web.with_env("VERSION", "2"));
    tokio::time::sleep(Duration::from_millis(500)).await;
    worker_handle.destroy();

    let printer = tokio::spawn(async move {
        while let Some(update) = status_rx.recv().await {
            println!("{:<8} {:<8} {}", update.task_name, update.status, update.description);
        }
    });

    web_handle.wait().await;
    worker_handle.wait().await;
    // Runners drop their parent on exit, which closes the status channel
    printer.await?;
    println!(
        "web state kept at {}; worker state erased: {}",
        web_handle.state_file_path().display(),
        !worker_handle.state_file_path().exists()
    );

    Ok(())
}
