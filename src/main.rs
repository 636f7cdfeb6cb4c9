mod analyzer;
mod config;
mod dedup;
mod dns;
mod event_log;
mod logging;
mod monitor;
mod process_info;
mod record;
mod sampler;
mod whois;

use crate::config::Config;
use crate::event_log::EventLog;
use crate::monitor::Monitor;
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "connwatch",
    version,
    about = "Outbound connection monitor with process, reverse-DNS and WHOIS enrichment"
)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch outbound connections and append enriched records to the daily log.
    Monitor,
    /// Summarize a day's event log.
    Analyze {
        /// Log file to analyze; defaults to the current day's file.
        log_file: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config);

    match cli.command {
        Command::Monitor => run_monitor(config),
        Command::Analyze { log_file } => run_analyzer(&config, log_file),
    }
}

fn load_config(path: &Path) -> Config {
    if path.exists() {
        match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config ({}), using defaults", e);
                Config::default()
            }
        }
    } else {
        Config::default()
    }
}

fn run_monitor(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    logging::setup_logging(&config.logging)?;

    println!("Starting connection monitor...");
    println!("Monitoring outgoing connections. Press Ctrl+C to stop.");
    info!(
        "connwatch starting: sampling every {}ms, event logs in {}",
        config.monitoring.poll_interval_ms, config.monitoring.log_dir
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut monitor = Monitor::new(&config);
        monitor.run().await
    })?;

    println!("\nStopping connection monitor...");
    info!("connwatch stopped");
    Ok(())
}

fn run_analyzer(
    config: &Config,
    log_file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = log_file
        .unwrap_or_else(|| EventLog::new(config.monitoring.log_dir.as_str()).today_path());

    if !path.exists() {
        println!("Log file {} does not exist!", path.display());
        return Ok(());
    }

    let report = analyzer::analyze(&path)?;
    if report.total_connections == 0 {
        println!("No connections found in log file.");
        return Ok(());
    }
    print!("{report}");
    Ok(())
}
