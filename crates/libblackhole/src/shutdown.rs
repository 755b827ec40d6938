use std::time::Duration;

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::iterator::Signals;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long a graceful shutdown may take before the watchdog gives up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const EXIT_CODE_FORCED: i32 = 2;

/// Cancel the returned token on the first termination signal and let the
/// process drain. A repeated signal, or a drain outlasting
/// [`SHUTDOWN_GRACE`], exits immediately.
pub fn install_shutdown_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut signals = Signals::new(TERM_SIGNALS)?;
    {
        let token = token.clone();
        std::thread::spawn(move || {
            for (count, signal) in signals.forever().enumerate() {
                match count {
                    0 => {
                        info!(signal, "shutting down, repeat the signal to exit immediately");
                        token.cancel();
                        std::thread::spawn(|| {
                            std::thread::sleep(SHUTDOWN_GRACE);
                            error!(grace = ?SHUTDOWN_GRACE, "shutdown watchdog expired, exiting");
                            std::process::exit(EXIT_CODE_FORCED);
                        });
                    }
                    _ => {
                        error!(signal, "exiting immediately");
                        std::process::exit(EXIT_CODE_FORCED);
                    }
                }
            }
        });
    }
    Ok(token)
}
