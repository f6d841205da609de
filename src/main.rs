//! ci-ref-status - feed pipeline completions into the ref status roll-up.

use std::path::PathBuf;

use ci_ref_status_lib::config::TrackerConfig;
use ci_ref_status_lib::error::AppError;
use ci_ref_status_lib::services::event_feed;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(
    name = "ci-ref-status",
    version,
    about = "Roll pipeline completions up into per-ref CI status"
)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true, default_value = "settings.json")]
    config: PathBuf,

    /// Override the database path from the settings file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply `PipelineCompleted` JSON events read line by line from stdin
    Apply,
    /// Print the current status of a ref
    Status {
        project_id: i64,
        ref_path: String,
    },
    /// List the failing refs of a project
    Failing { project_id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = TrackerConfig::load(&cli.config)?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    let tracker = ci_ref_status_lib::open_tracker(&config).await?;

    match cli.command {
        Commands::Apply => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(report) = event_feed::apply_line(&tracker, &line).await {
                    println!("{}", serde_json::to_string(&report)?);
                }
            }
        }
        Commands::Status {
            project_id,
            ref_path,
        } => {
            let status = tracker.current_status(project_id, &ref_path).await?;
            println!(
                "{}",
                json!({ "status": status, "failing": status.is_failing() })
            );
        }
        Commands::Failing { project_id } => {
            for ci_ref in tracker.failing_refs(project_id).await? {
                println!("{}", serde_json::to_string(&ci_ref)?);
            }
        }
    }

    Ok(())
}
