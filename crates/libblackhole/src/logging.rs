use std::io::LineWriter;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

pub struct InitLoggingOptions<'a> {
    pub default_rust_log_value: Option<&'a str>,
    pub log_file: Option<&'a str>,
}

/// Console logging through `RUST_LOG`/the default directive, plus an
/// optional append-mode log file with the same filter.
pub fn init_logging(opts: InitLoggingOptions) -> anyhow::Result<()> {
    let env_filter = || {
        EnvFilter::builder()
            .with_default_directive(
                opts.default_rust_log_value
                    .unwrap_or("info")
                    .parse()
                    .context("can't parse provided rust_log value")?,
            )
            .from_env()
            .context("invalid RUST_LOG value")
    };

    let layered = tracing_subscriber::registry().with(fmt::layer().with_filter(env_filter()?));

    if let Some(log_file) = opts.log_file {
        let file = std::sync::Mutex::new(LineWriter::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .with_context(|| format!("error opening log file {log_file:?}"))?,
        ));
        layered
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(file)
                    .with_filter(env_filter()?),
            )
            .try_init()
            .context("can't init logging to file")?;
    } else {
        layered.try_init().context("can't init logging")?;
    }
    Ok(())
}
