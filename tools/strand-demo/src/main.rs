///
/// strand-demo - Main Entry Point
///
/// Small programs that walk through tasks, wait groups, channels, mutexes,
/// select and cancellation. Each subcommand prints what it does to stdout;
/// library diagnostics go to stderr through tracing.
///

mod demos;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strand_core::SchedulerConfig;
use tracing::Level;

#[derive(Parser)]
#[command(name = "strand-demo")]
#[command(author, version, about = "Demos for the strand concurrency primitives", long_about = None)]
struct Cli {
    /// Scheduler configuration file (TOML). Defaults to $STRAND_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the number of worker threads kept alive
    #[arg(long, global = true)]
    core_workers: Option<usize>,

    /// Override the maximum number of worker threads
    #[arg(long, global = true)]
    max_workers: Option<usize>,

    /// Log scheduler and channel activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Spawn fire-and-forget tasks
    Tasks {
        /// Number of tasks to spawn
        #[arg(long, default_value_t = 11)]
        count: usize,
    },

    /// Wait for a group of tasks to finish
    WaitGroup {
        /// Number of tasks in the group
        #[arg(long, default_value_t = 11)]
        count: usize,
    },

    /// Pass values between tasks over unbuffered channels
    Channels,

    /// Queue work on a buffered channel, then close and drain it
    Buffered {
        /// Number of emails to queue
        #[arg(long, default_value_t = 10)]
        emails: usize,

        /// Channel capacity
        #[arg(long, default_value_t = 100)]
        capacity: usize,
    },

    /// Count views from many tasks behind a mutex
    Mutex {
        /// Number of concurrent increments
        #[arg(long, default_value_t = 100)]
        tasks: usize,
    },

    /// Wait on several channels at once
    Select,

    /// Stop workers by closing a shared channel
    Cancel {
        /// Number of workers
        #[arg(long, default_value_t = 3)]
        workers: usize,

        /// How long to let the workers run, in milliseconds
        #[arg(long, default_value_t = 250)]
        run_ms: u64,
    },

    /// Run every demo in turn
    All,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    strand_threads::init_global(config);

    match cli.command {
        Commands::Tasks { count } => demos::tasks(count),
        Commands::WaitGroup { count } => demos::wait_group(count),
        Commands::Channels => demos::channels(),
        Commands::Buffered { emails, capacity } => demos::buffered(emails, capacity),
        Commands::Mutex { tasks } => demos::mutex(tasks),
        Commands::Select => demos::select(),
        Commands::Cancel { workers, run_ms } => demos::cancel(workers, run_ms),
        Commands::All => demos::all(),
    }
}

fn load_config(cli: &Cli) -> Result<SchedulerConfig, strand_core::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_path(path)?,
        None => SchedulerConfig::from_env()?,
    };

    if let Some(core) = cli.core_workers {
        config.core_workers = core;
    }
    if let Some(max) = cli.max_workers {
        config.max_workers = max;
    }
    config.validate()?;
    Ok(config)
}
