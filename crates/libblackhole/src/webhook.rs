use libblackhole_core::spawn_utils::spawn;
use tracing::{debug, debug_span};

use crate::config::DiscordConfig;

const ERROR_COLOR: u32 = 15548997;
const UPDATE_COLOR: u32 = 3066993;

/// Fire-and-forget Discord webhook notifications. Delivery failures are
/// swallowed: a dead webhook must never take the pipeline down with it.
#[derive(Clone)]
pub struct Notifier {
    cfg: DiscordConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(cfg: DiscordConfig) -> Notifier {
        Notifier {
            cfg,
            client: reqwest::Client::new(),
        }
    }

    pub fn error(&self, title: &str, message: &str) {
        if !self.cfg.enabled {
            return;
        }
        // Errors carry their payload in a preformatted block.
        self.send("Error Bot", title, &format!("```{message}```"), ERROR_COLOR);
    }

    pub fn update(&self, title: &str, message: &str) {
        if !self.cfg.enabled || !self.cfg.update_enabled {
            return;
        }
        self.send("Update Bot", title, message, UPDATE_COLOR);
    }

    fn send(&self, username: &str, title: &str, description: &str, color: u32) {
        let Some(url) = self.cfg.webhook_url.clone() else {
            return;
        };
        let body = serde_json::json!({
            "username": username,
            "embeds": [{
                "title": title,
                "description": description,
                "color": color,
            }],
        });
        let client = self.client.clone();
        spawn(debug_span!("discord_webhook"), async move {
            if let Err(e) = client.post(&url).json(&body).send().await {
                debug!("error delivering discord webhook: {e:#}");
            }
            Ok(())
        });
    }
}
