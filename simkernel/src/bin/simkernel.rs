//! SimKernel CLI
//!
//! Command-line interface for running the scheduling engine against the
//! in-process simulated machine.
//!
//! # Usage
//!
//! ```bash
//! # Write a default configuration
//! simkernel init
//!
//! # Run a program on two CPUs with a disk and a printer
//! simkernel run --program programs/main --size 128 --cpus 2 --device DISK --device PRINTER
//!
//! # Try SRT with smallest-first admission
//! simkernel run --program programs/main --size 128 --short-term srt --long-term pmcp
//! ```

use simkernel::sim::{Simulation, SimulationConfig};
use simkernel::{KernelConfig, LongTermAlgorithm, ProcessReport, ShortTermAlgorithm};

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// SimKernel - scheduling engine for a simulated kernel
#[derive(Parser)]
#[command(name = "simkernel")]
#[command(version)]
#[command(about = "Simulated kernel scheduler", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SIMKERNEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(InitArgs),

    /// Run a program until every process has finished
    Run(RunArgs),

    /// Show version
    Version,
}

#[derive(Args)]
struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Pseudocode program of the first process
    #[arg(long)]
    program: PathBuf,

    /// Memory size of the first process
    #[arg(long)]
    size: u64,

    /// Number of CPUs
    #[arg(long, default_value = "1")]
    cpus: usize,

    /// I/O device pool name; repeat for more devices
    #[arg(long = "device", default_value = "DISK")]
    devices: Vec<String>,

    /// Memory capacity in bytes
    #[arg(long, default_value = "4096")]
    memory: u64,

    /// Time per instruction in milliseconds
    #[arg(long, default_value = "50")]
    instruction_delay: u64,

    /// Short-term algorithm (fifo, sjf, srt), overrides the configuration
    #[arg(long)]
    short_term: Option<ShortTermAlgorithm>,

    /// Long-term algorithm (fifo, pmcp), overrides the configuration
    #[arg(long)]
    long_term: Option<LongTermAlgorithm>,

    /// Print the final reports as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let explicit_config = cli.config.is_some();
    let config_path = cli
        .config
        .or_else(|| dirs::config_dir().map(|d| d.join("simkernel").join("kernel.json")))
        .unwrap_or_else(|| PathBuf::from(".simkernel/kernel.json"));

    let config = if config_path.exists() {
        KernelConfig::load(&config_path)?
    } else if explicit_config && !matches!(cli.command, Commands::Init(_)) {
        return Err(format!("Configuration file {} not found", config_path.display()).into());
    } else {
        KernelConfig::default()
    };

    // Setup logging
    let log_level = match cli.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    match cli.command {
        Commands::Init(args) => run_init(args, &config_path)?,
        Commands::Run(args) => run_simulation(args, config).await?,
        Commands::Version => run_version(),
    }

    Ok(())
}

/// Write the default configuration
fn run_init(args: InitArgs, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !args.force {
        return Err(format!(
            "Configuration already exists at {}. Use --force to overwrite.",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    KernelConfig::default().save(config_path)?;
    info!("Created configuration at {}", config_path.display());
    Ok(())
}

/// Run the simulation
async fn run_simulation(args: RunArgs, mut config: KernelConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(algorithm) = args.short_term {
        config.short_term_algorithm = algorithm;
    }
    if let Some(algorithm) = args.long_term {
        config.long_term_algorithm = algorithm;
    }
    if args.cpus == 0 {
        return Err("At least one CPU is required".into());
    }

    let program = args
        .program
        .to_str()
        .ok_or("Program path must be valid UTF-8")?
        .to_string();

    let machine = SimulationConfig {
        memory_size: args.memory,
        cpus: args.cpus,
        devices: args.devices,
        instruction_delay: Duration::from_millis(args.instruction_delay),
    };

    let simulation = Simulation::start(config, machine)?;

    let reports = tokio::select! {
        reports = simulation.run(&program, args.size) => match reports {
            Ok(reports) => reports,
            Err(e) => {
                simulation.shutdown();
                return Err(e.into());
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, {} processes still running", simulation.kernel().live_processes());
            simulation.kernel().processes()
        }
    };
    simulation.shutdown();

    print_reports(&reports, args.json)?;
    Ok(())
}

fn print_reports(reports: &[ProcessReport], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    println!();
    println!("{:<6} {:<8} {:<14} {:>6} {:>10} {:>10}", "PID", "PARENT", "STATE", "PC", "CPU (ms)", "EST (ms)");
    for report in reports {
        let parent = report.parent.map_or("-".to_string(), |p| p.to_string());
        println!(
            "{:<6} {:<8} {:<14} {:>6} {:>10} {:>10.0}",
            report.pid,
            parent,
            report.state.to_string(),
            report.program_counter,
            report.cpu_time_ms,
            report.estimated_burst_ms
        );
    }

    println!();
    for report in reports {
        println!("{}", report.metrics_line());
    }
    Ok(())
}

/// Show version
fn run_version() {
    println!("SimKernel {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Short-term algorithms: FIFO, SJF, SRT");
    println!("  Long-term algorithms:  FIFO, PMCP");
    println!("  Instructions: NOOP, IO, INIT_PROC, DUMP_MEMORY, EXIT");
}
