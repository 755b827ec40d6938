use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::error;

use libblackhole::config::ServicesOpts;
use libblackhole::logging::{InitLoggingOptions, init_logging};
use libblackhole::repair::{RepairEngine, RepairMode, RepairOpts};
use libblackhole::shutdown::install_shutdown_handler;
use libblackhole::webhook::Notifier;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser)]
#[command(version, about = "Repair broken symlinks or missing files")]
struct Opts {
    /// Perform a dry run without making any changes.
    #[arg(long)]
    dry_run: bool,

    /// Execute without confirmation prompts.
    #[arg(long)]
    no_confirm: bool,

    /// `symlink` repairs broken symlinks, `file` repairs missing files.
    #[arg(long, value_enum, default_value_t = RepairMode::Symlink)]
    mode: RepairMode,

    /// Interval in smart format (e.g. 1h2m3s) to wait between repairing
    /// each media item.
    #[arg(long, value_parser = parse_duration::parse, default_value = "0s", env = "REPAIR_REPAIR_INTERVAL")]
    repair_interval: Duration,

    /// Interval in smart format (e.g. 1w2d3h4m5s) to run the repair
    /// process. Zero runs a single pass and exits.
    #[arg(long, value_parser = parse_duration::parse, default_value = "0s", env = "REPAIR_RUN_INTERVAL")]
    run_interval: Duration,

    /// Search for a season pack when a fully available season is spread
    /// across multiple folders.
    #[arg(long)]
    season_packs: bool,

    /// Include unmonitored media in the repair process.
    #[arg(long)]
    include_unmonitored: bool,

    /// The console loglevel
    #[arg(value_enum, short = 'v', env = "BLACKHOLE_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// The log filename to also write to in addition to the console.
    #[arg(long = "log-file", env = "BLACKHOLE_LOG_FILE")]
    log_file: Option<String>,

    #[command(flatten)]
    services: ServicesOpts,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    init_logging(InitLoggingOptions {
        default_rust_log_value: Some(match opts.log_level.unwrap_or(LogLevel::Info) {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }),
        log_file: opts.log_file.as_deref(),
    })?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let token = install_shutdown_handler()?;

    let result = rt.block_on(async_main(opts, token));
    if let Err(e) = result.as_ref() {
        error!("error running repair: {e:?}");
    }
    rt.shutdown_timeout(Duration::from_secs(1));
    match result {
        Ok(_) => std::process::exit(0),
        Err(_) => std::process::exit(1),
    }
}

async fn async_main(opts: Opts, cancel: CancellationToken) -> anyhow::Result<()> {
    let services = opts.services.build()?;
    let notifier = Notifier::new(services.discord.clone());
    let engine = RepairEngine::new(
        RepairOpts {
            dry_run: opts.dry_run,
            no_confirm: opts.no_confirm,
            mode: opts.mode,
            repair_interval: opts.repair_interval,
            run_interval: opts.run_interval,
            season_packs: opts.season_packs,
            include_unmonitored: opts.include_unmonitored,
        },
        &services,
        notifier,
        cancel.clone(),
    )?;

    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        r = engine.run() => r,
    }
}
