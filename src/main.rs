use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use schedsh::config::{self, ShellConfig};
use schedsh::scheduler::SchedulerHandle;
use schedsh::shell::Shell;
use schedsh::shutdown;
use schedsh::table::SharedTable;
use schedsh::tracker;

/// Interactive shell front end to an out-of-process priority job scheduler.
///
/// Runs foreground commands and pipelines itself; `submit`ted jobs are
/// forked, tagged with a priority, suspended and left in a shared table for
/// the external scheduler to admit and resume.
#[derive(Parser, Debug)]
#[command(name = "schedsh")]
#[command(version)]
struct Args {
    /// Number of cpus available to the external scheduler
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    ncpu: u32,

    /// Scheduler time-slice unit in milliseconds
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    tslice: u32,

    /// Capacity of the shared history table
    #[arg(long, default_value_t = config::DEFAULT_HISTORY_CAPACITY)]
    history_capacity: u32,

    /// Path to the external scheduler binary
    #[arg(long, default_value = "./scheduler")]
    scheduler: PathBuf,

    /// Do not spawn a scheduler; submitted jobs stay suspended.
    /// Useful for development and tests.
    #[arg(long)]
    standalone: bool,

    /// Name of the shared memory object (defaults to a per-session name)
    #[arg(long)]
    shm_name: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ShellConfig {
        ncpu: args.ncpu,
        tslice_ms: args.tslice,
        history_capacity: args.history_capacity,
        shm_name: args.shm_name.unwrap_or_else(config::default_shm_name),
        scheduler_path: if args.standalone {
            None
        } else {
            Some(args.scheduler)
        },
    };

    // Shared-region and guard failures are fatal: shared-state integrity
    // cannot be assumed after them, so there is no retry anywhere below.
    let table = SharedTable::create(
        &config.shm_name,
        config.history_capacity,
        config.ncpu,
        config.tslice_ms,
    )?;

    let scheduler = match &config.scheduler_path {
        Some(path) => Some(SchedulerHandle::spawn(path, table.name())?),
        None => {
            tracing::warn!("Running standalone: submitted jobs will stay suspended");
            None
        }
    };

    tracker::install(&table, scheduler.as_ref().map(SchedulerHandle::pid))?;
    shutdown::install_shutdown_handler()?;

    println!(
        "schedsh ready (ncpu={}, tslice={}ms); scheduler {}",
        config.ncpu,
        config.tslice_ms,
        match &config.scheduler_path {
            Some(path) => format!("at {}", path.display()),
            None => "disabled".to_string(),
        }
    );

    let run_result = Shell::new(&table).run();

    // Teardown in reverse: stop observing terminations, stop the scheduler,
    // then destroy the region it was attached to.
    tracker::disarm();
    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.terminate() {
            tracing::warn!(error = %e, "Scheduler did not terminate cleanly");
        }
    }
    drop(table);

    run_result?;
    Ok(())
}
