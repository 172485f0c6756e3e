//! voxd: the VoxGrid autoscaler daemon.
//!
//! # Usage
//!
//! ```text
//! voxd run --env-file .env --listen 0.0.0.0:9100
//! voxd run --dry-run --log-json
//! voxd check-config --env-file .env
//! voxd plan-affinity --cores 8 --workers asr-1,asr-2,translator-1
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voxd::{RunOptions, load_config, plan_affinity};

#[derive(Parser)]
#[command(name = "voxd", about = "VoxGrid autoscaler daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler and its HTTP endpoints until Ctrl-C.
    Run {
        /// `.env` file consulted for keys the environment does not set.
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Decide and log scaling actions without touching containers.
        #[arg(long)]
        dry_run: bool,

        /// Address for `/metrics` and `/healthz`.
        #[arg(long, default_value = "0.0.0.0:9100")]
        listen: SocketAddr,
    },

    /// Validate the configuration and print it as JSON.
    CheckConfig {
        #[arg(long)]
        env_file: Option<PathBuf>,
    },

    /// Print the core assignment for a worker list as JSON.
    PlanAffinity {
        /// Usable cores (0 = no pinning).
        #[arg(long)]
        cores: usize,

        /// Worker IDs in membership order.
        #[arg(long, value_delimiter = ',', required = true)]
        workers: Vec<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,voxd=debug,voxgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            env_file,
            dry_run,
            listen,
        } => {
            voxd::run(RunOptions {
                env_file,
                dry_run,
                listen,
            })
            .await
        }
        Command::CheckConfig { env_file } => {
            let config = load_config(env_file.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::PlanAffinity { cores, workers } => {
            let plan = plan_affinity(cores, &workers)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
    }
}
