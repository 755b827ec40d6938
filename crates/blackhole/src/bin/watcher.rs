use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use libblackhole::config::{BlackholeOpts, ServicesOpts};
use libblackhole::ingest::Blackhole;
use libblackhole::logging::{InitLoggingOptions, init_logging};
use libblackhole::shutdown::install_shutdown_handler;
use libblackhole::torrent_file::Category;
use libblackhole::watch::watch_category;
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
#[command(version, about = "Watch the blackhole directories and feed dropped grabs to debrid backends")]
struct Opts {
    /// The console loglevel
    #[arg(value_enum, short = 'v', env = "BLACKHOLE_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// The log filename to also write to in addition to the console.
    #[arg(long = "log-file", env = "BLACKHOLE_LOG_FILE")]
    log_file: Option<String>,

    #[command(flatten)]
    blackhole: BlackholeOpts,

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
        error!("error running blackhole-watcher: {e:?}");
    }
    rt.shutdown_timeout(Duration::from_secs(1));
    match result {
        Ok(_) => std::process::exit(0),
        Err(_) => std::process::exit(1),
    }
}

async fn async_main(opts: Opts, cancel: CancellationToken) -> anyhow::Result<()> {
    let blackhole_cfg = opts.blackhole.build()?;
    let services = opts.services.build()?;
    let notifier = Notifier::new(services.discord.clone());
    let blackhole = Blackhole::new(blackhole_cfg, &services, notifier)?;

    blackhole.validate().await;

    for category in [Category::Movies, Category::Series] {
        watch_category(&blackhole, category, &cancel)
            .with_context(|| format!("error watching {category}"))?;
    }
    info!("watching blackhole");

    cancel.cancelled().await;
    info!("shutting down");
    Ok(())
}
