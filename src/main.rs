use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use fulfillment_scheduler::config::SchedulerConfig;
use fulfillment_scheduler::logging;
use fulfillment_scheduler::sim::{self, BenchOptions};

#[derive(Parser)]
#[command(name = "fulfillment_scheduler", version, about = "Kitting fulfillment scheduler")]
struct Cli {
    /// TOML file overriding scheduler defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scripted two-order demo (default).
    Demo,
    /// Run one seeded benchmark and print a CSV line.
    Bench {
        #[arg(long, default_value_t = 8)]
        shipments: usize,
        #[arg(long, default_value_t = 4)]
        products: usize,
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 0)]
        work_ms: u64,
        /// Cancel the run after this many milliseconds; 0 disables.
        #[arg(long, default_value_t = 0)]
        deadline_ms: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SchedulerConfig::default(),
    };

    match cli.command.unwrap_or(Commands::Demo) {
        Commands::Demo => sim::run_demo(config),
        Commands::Bench {
            shipments,
            products,
            failure_rate,
            seed,
            work_ms,
            deadline_ms,
        } => sim::run_benchmark(
            config,
            BenchOptions {
                shipments,
                products_per_shipment: products,
                failure_rate,
                seed,
                work_ms,
                deadline_ms,
            },
        ),
    }
}
