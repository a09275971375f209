mod report;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "crossing",
    about = "Crossing: Lamport-ordered intersection mutual exclusion simulator",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full simulation: relay plus one agent per vehicle
    Simulate {
        /// JSON configuration file
        #[arg(short, long, env = "CROSSING_CONFIG")]
        config: Option<PathBuf>,

        /// Number of vehicles
        #[arg(short, long, env = "CROSSING_AGENTS")]
        agents: Option<usize>,

        /// Seed for lanes and arrival delays
        #[arg(long, env = "CROSSING_SEED")]
        seed: Option<u64>,

        /// Time a vehicle spends inside the intersection
        #[arg(long, env = "CROSSING_CROSSING_MS")]
        crossing_ms: Option<u64>,

        /// Upper bound of the random arrival delay
        #[arg(long, env = "CROSSING_MAX_ARRIVAL_MS")]
        max_arrival_ms: Option<u64>,

        /// Print the full report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration and print the effective conflict table
    Check {
        /// JSON configuration file
        #[arg(short, long, env = "CROSSING_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            agents,
            seed,
            crossing_ms,
            max_arrival_ms,
            json,
        } => {
            let overrides = runner::Overrides {
                agents,
                seed,
                crossing_ms,
                max_arrival_ms,
            };
            runner::simulate(config.as_deref(), overrides, json).await
        }
        Commands::Check { config } => runner::check(config.as_deref()),
        Commands::Version => {
            println!("crossing {}", env!("CARGO_PKG_VERSION"));
            println!("Lamport-ordered mutual exclusion for a four-way intersection");
            ExitCode::SUCCESS
        }
    }
}
