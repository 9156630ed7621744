//! Main entry point for the intake operator CLI
//!
//! ```text
//! intake check-config intake.toml
//! intake simulate --agents 5 --calls 50 --handle-ms 200
//! ```

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use intake_infra_common::logging::{parse_log_level, setup_logging, LoggingConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Call intake routing tools", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "INTAKE_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a configuration file
    CheckConfig {
        /// Path to a .toml or .json configuration file
        path: PathBuf,
    },

    /// Run agents and callers against an in-process intake engine
    Simulate {
        /// Number of agents to log in
        #[arg(long, default_value = "3")]
        agents: usize,

        /// Number of calls to place
        #[arg(long, default_value = "20")]
        calls: usize,

        /// Concurrent calls per agent (defaults to the configured capacity)
        #[arg(long)]
        capacity: Option<u32>,

        /// Mean time an agent spends on a call, in milliseconds
        #[arg(long, default_value = "200")]
        handle_ms: u64,

        /// Configuration file for the engine
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match parse_log_level(&cli.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(2);
        }
    };
    let mut logging = LoggingConfig::new(level, "intake");
    if cli.json_logs {
        logging = logging.with_json();
    }
    if let Err(e) = setup_logging(logging) {
        eprintln!("⚠️ Logging not initialized: {}", e);
    }

    let result = match cli.command {
        Command::CheckConfig { path } => commands::check_config::execute(&path),
        Command::Simulate {
            agents,
            calls,
            capacity,
            handle_ms,
            config,
        } => {
            let options = commands::simulate::SimulationOptions {
                agents,
                calls,
                capacity,
                handle_ms,
                config,
            };
            commands::simulate::execute(options).await
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}
