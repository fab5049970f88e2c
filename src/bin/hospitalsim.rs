//! Hospital simulation CLI
//!
//! Interactive menu over a simulation supervisor.
//!
//! # Example
//!
//! ```bash
//! # Durable store in ./hospital.db, default 5 minute deadline and quota of 20
//! hospitalsim
//!
//! # Quick throwaway run
//! hospitalsim --in-memory --deadline-minutes 1 --quota 5 --min-delay-ms 100 --max-delay-ms 300
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hospitalsim::config::{
    DEFAULT_MAX_ATTENTIONS_PER_DOCTOR, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_DURATION_MINUTES, DEFAULT_MIN_DELAY_MS,
};
use hospitalsim::{AttentionStore, InMemoryStore, SimulationConfig, SimulationReport, SimulationSupervisor, StopReason};

/// Hospital simulation
///
/// Runs one worker thread per doctor, each recording patient attentions until
/// it reaches its quota or the deadline passes.
#[derive(Parser, Debug)]
#[command(name = "hospitalsim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory of the persistent store
    #[arg(long, default_value = "./hospital.db")]
    data_dir: PathBuf,

    /// Keep everything in memory instead of opening the data directory
    #[arg(long)]
    in_memory: bool,

    /// Deadline for a run, in minutes
    #[arg(long, default_value_t = DEFAULT_MAX_DURATION_MINUTES)]
    deadline_minutes: u64,

    /// Attentions each doctor completes before stopping
    #[arg(long, default_value_t = DEFAULT_MAX_ATTENTIONS_PER_DOCTOR)]
    quota: u32,

    /// Shortest pause between patients, in milliseconds
    #[arg(long, default_value_t = DEFAULT_MIN_DELAY_MS)]
    min_delay_ms: u64,

    /// Longest pause between patients, in milliseconds
    #[arg(long, default_value_t = DEFAULT_MAX_DELAY_MS)]
    max_delay_ms: u64,
}

enum MenuChoice {
    Start,
    Statistics,
    Clear,
    Exit,
}

impl MenuChoice {
    fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Start),
            "2" => Some(Self::Statistics),
            "3" => Some(Self::Clear),
            "4" => Some(Self::Exit),
            _ => None,
        }
    }
}

fn open_store(args: &Args) -> Result<Arc<dyn AttentionStore>, String> {
    if args.in_memory {
        info!("using in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    open_durable_store(args)
}

#[cfg(feature = "persistent")]
fn open_durable_store(args: &Args) -> Result<Arc<dyn AttentionStore>, String> {
    let store = hospitalsim::open_store(&args.data_dir, None)
        .map_err(|e| format!("cannot open store at {}: {e}", args.data_dir.display()))?;
    info!(data_dir = %args.data_dir.display(), "opened persistent store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "persistent"))]
fn open_durable_store(args: &Args) -> Result<Arc<dyn AttentionStore>, String> {
    warn!(
        data_dir = %args.data_dir.display(),
        "built without the `persistent` feature; using in-memory store"
    );
    Ok(Arc::new(InMemoryStore::new()))
}

fn print_menu(out: &mut impl Write) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "=== HOSPITAL SIMULATION ===")?;
    writeln!(out, "1. Start simulation")?;
    writeln!(out, "2. Show statistics")?;
    writeln!(out, "3. Clear data")?;
    writeln!(out, "4. Exit")?;
    write!(out, "Choose an option: ")?;
    out.flush()
}

fn print_report(out: &mut impl Write, report: &SimulationReport) -> io::Result<()> {
    let reason = match report.stop_reason {
        StopReason::AllWorkersFinished => "all doctors reached their quota",
        StopReason::DeadlineElapsed => "deadline reached",
    };
    writeln!(out)?;
    writeln!(
        out,
        "Run {} finished after {:.1}s: {reason}.",
        report.run_id,
        report.elapsed.as_secs_f64()
    )?;
    writeln!(out, "{}", report.statistics)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,hospitalsim=info")),
        )
        .init();

    let args = Args::parse();

    let config = match SimulationConfig::default()
        .with_max_duration_minutes(args.deadline_minutes)
        .with_quota(args.quota)
        .with_delay_ms(args.min_delay_ms..=args.max_delay_ms)
        .validate()
    {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let store = match open_store(&args) {
        Ok(store) => store,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let supervisor = SimulationSupervisor::new(store, config);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        if let Err(e) = print_menu(&mut stdout) {
            warn!(error = %e, "cannot write to stdout");
        }

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "cannot read from stdin");
                break;
            }
            None => break,
        };

        let outcome = match MenuChoice::parse(&line) {
            Some(MenuChoice::Start) => match supervisor.run_simulation() {
                Ok(report) => print_report(&mut stdout, &report),
                Err(e) => writeln!(stdout, "Simulation failed: {e}"),
            },
            Some(MenuChoice::Statistics) => match supervisor.compute_statistics() {
                Ok(stats) => writeln!(stdout, "\n{stats}"),
                Err(e) => writeln!(stdout, "Cannot compute statistics: {e}"),
            },
            Some(MenuChoice::Clear) => match supervisor.clear_attentions() {
                Ok(cleared) => writeln!(stdout, "Removed {cleared} attentions."),
                Err(e) => writeln!(stdout, "Cannot clear data: {e}"),
            },
            Some(MenuChoice::Exit) => break,
            None => writeln!(stdout, "Invalid option, please choose 1-4."),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "cannot write to stdout");
        }
    }

    info!("goodbye");
    ExitCode::SUCCESS
}
