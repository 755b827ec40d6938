use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::arr::ArrClient;

pub const DEFAULT_REFRESH_COUNT: u32 = 60;

/// Per-process singleton for the manager's queue-rescan loop: the loop is
/// issued once a second for a while after materialization so the manager
/// notices and imports the symlinks. Starting a new refresh cancels the one
/// in progress (the old loop observes the token at its sleep).
pub struct RefreshScheduler {
    slot: parking_lot::Mutex<Option<CancellationToken>>,
}

impl RefreshScheduler {
    pub fn new() -> RefreshScheduler {
        RefreshScheduler {
            slot: parking_lot::Mutex::new(None),
        }
    }

    pub async fn refresh(&self, arr: &ArrClient, count: u32) {
        let token = CancellationToken::new();
        if let Some(previous) = self.slot.lock().replace(token.clone()) {
            debug!("refresh already in progress, restarting");
            previous.cancel();
        }

        let run = async {
            for _ in 0..count {
                // The command is idempotent; delivery failures just cost one tick.
                if let Err(e) = arr.refresh_monitored_downloads().await {
                    warn!("error refreshing monitored downloads: {e:#}");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        };
        tokio::select! {
            _ = token.cancelled() => {
                debug!("refresh superseded");
            }
            _ = run => {}
        }
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}
