//! Aureus CLI
//!
//! Validate, plan and run workflow documents. Results go to stdout as
//! JSON; logs go to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;

use aureus_runtime::WorkflowStatus;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use commands::RunOptions;
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aureus")]
#[command(about = "Aureus - governed agentic workflow engine", long_about = None)]
struct Cli {
    /// Log level for aureus crates when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow document for structural errors
    Validate {
        /// Path to workflow file
        #[arg(short, long)]
        file: PathBuf,
        /// Maximum number of tasks accepted
        #[arg(long, default_value_t = 10_000)]
        max_tasks: usize,
    },
    /// Print the ready sets a workflow resolves to
    Plan {
        /// Path to workflow file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run a workflow against the simulated sandbox
    Run {
        /// Path to workflow file
        #[arg(short, long)]
        file: PathBuf,
        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Gate bindings (JSON)
        #[arg(short, long)]
        gates: Option<PathBuf>,
        /// Approve every approval and recovery request
        #[arg(long)]
        auto_approve: bool,
    },
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("aureus={level}")))
        .unwrap_or_else(|_| EnvFilter::new("aureus=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn print(report: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Validate { file, max_tasks } => {
            let report = commands::validate(&file, max_tasks)?;
            print(&report)?;
            if report["valid"] != Value::Bool(true) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Plan { file } => print(&commands::plan(&file)?),
        Commands::Run {
            file,
            config,
            gates,
            auto_approve,
        } => {
            let options = RunOptions {
                config,
                gates,
                auto_approve,
            };
            let (report, status) = commands::run(&file, &options).await?;
            print(&report)?;
            match status {
                WorkflowStatus::Success => Ok(()),
                WorkflowStatus::Partial => std::process::exit(2),
                WorkflowStatus::Failed => std::process::exit(1),
            }
        }
    }
}
