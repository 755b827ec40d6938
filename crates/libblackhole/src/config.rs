use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use clap::builder::BoolishValueParser;
use url::Url;

use crate::torrent_file::Category;

/// Blackhole directory and timing options. Every option binds an
/// environment variable, so `blackhole-watcher` runs with no arguments.
#[derive(Args, Debug, Clone)]
pub struct BlackholeOpts {
    /// Parent directory containing the per-category watch directories.
    #[arg(long, env = "BLACKHOLE_BASE_WATCH_PATH")]
    pub base_watch_path: PathBuf,

    /// Watch subdirectory for movies.
    #[arg(long, env = "BLACKHOLE_RADARR_PATH")]
    pub radarr_path: String,

    /// Watch subdirectory for series.
    #[arg(long, env = "BLACKHOLE_SONARR_PATH")]
    pub sonarr_path: String,

    /// Only accept grabs the debrid backend already has cached. Backends are
    /// then tried one after another instead of in parallel.
    #[arg(long, env = "BLACKHOLE_FAIL_IF_NOT_CACHED", action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub fail_if_not_cached: bool,

    /// How long to wait for a completed torrent's folder to appear on the mount.
    #[arg(long, env = "BLACKHOLE_RD_MOUNT_REFRESH_SECONDS")]
    pub rd_mount_refresh_seconds: u64,

    /// How many seconds of polling before a cached-required download is abandoned.
    #[arg(long, env = "BLACKHOLE_WAIT_FOR_TORRENT_TIMEOUT")]
    pub wait_for_torrent_timeout: u64,

    /// History page size used when matching a failed grab back to its history entry.
    #[arg(long, env = "BLACKHOLE_HISTORY_PAGE_SIZE")]
    pub history_page_size: u32,
}

#[derive(Args, Debug, Clone)]
pub struct RealDebridOpts {
    #[arg(long = "realdebrid-enabled", env = "REALDEBRID_ENABLED", action = clap::ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "true")]
    pub enabled: bool,

    #[arg(long = "realdebrid-host", env = "REALDEBRID_HOST")]
    pub host: Option<Url>,

    #[arg(long = "realdebrid-api-key", env = "REALDEBRID_API_KEY")]
    pub api_key: Option<String>,

    /// Where the mount exposes completed torrents.
    #[arg(long = "realdebrid-mount-torrents-path", env = "REALDEBRID_MOUNT_TORRENTS_PATH")]
    pub mount_torrents_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct TorboxOpts {
    #[arg(long = "torbox-enabled", env = "TORBOX_ENABLED", action = clap::ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "false")]
    pub enabled: bool,

    #[arg(long = "torbox-host", env = "TORBOX_HOST")]
    pub host: Option<Url>,

    #[arg(long = "torbox-api-key", env = "TORBOX_API_KEY")]
    pub api_key: Option<String>,

    #[arg(long = "torbox-mount-torrents-path", env = "TORBOX_MOUNT_TORRENTS_PATH")]
    pub mount_torrents_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ArrOpts {
    #[arg(long = "radarr-host", env = "RADARR_HOST")]
    pub radarr_host: Url,

    #[arg(long = "radarr-api-key", env = "RADARR_API_KEY")]
    pub radarr_api_key: String,

    #[arg(long = "sonarr-host", env = "SONARR_HOST")]
    pub sonarr_host: Url,

    #[arg(long = "sonarr-api-key", env = "SONARR_API_KEY")]
    pub sonarr_api_key: String,
}

#[derive(Args, Debug, Clone)]
pub struct DiscordOpts {
    #[arg(long = "discord-enabled", env = "DISCORD_ENABLED", action = clap::ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "false")]
    pub enabled: bool,

    #[arg(long = "discord-update-enabled", env = "DISCORD_UPDATE_ENABLED", action = clap::ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "false")]
    pub update_enabled: bool,

    #[arg(long = "discord-webhook-url", env = "DISCORD_WEBHOOK_URL")]
    pub webhook_url: Option<String>,
}

/// External services shared by the watcher and the repair tool.
#[derive(Args, Debug, Clone)]
pub struct ServicesOpts {
    #[command(flatten)]
    pub realdebrid: RealDebridOpts,

    #[command(flatten)]
    pub torbox: TorboxOpts,

    #[command(flatten)]
    pub arr: ArrOpts,

    #[command(flatten)]
    pub discord: DiscordOpts,
}

#[derive(Debug, Clone)]
pub struct BlackholeConfig {
    pub base_watch_path: PathBuf,
    pub radarr_path: String,
    pub sonarr_path: String,
    pub fail_if_not_cached: bool,
    pub rd_mount_refresh_seconds: u64,
    pub wait_for_torrent_timeout: u64,
    pub history_page_size: u32,
}

impl BlackholeConfig {
    pub fn watch_dir(&self, category: Category) -> PathBuf {
        self.base_watch_path.join(match category {
            Category::Movies => &self.radarr_path,
            Category::Series => &self.sonarr_path,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DebridBackendConfig {
    pub host: Url,
    pub api_key: String,
    pub mount_torrents_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArrInstanceConfig {
    pub host: Url,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub update_enabled: bool,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub realdebrid: Option<DebridBackendConfig>,
    pub torbox: Option<DebridBackendConfig>,
    pub radarr: ArrInstanceConfig,
    pub sonarr: ArrInstanceConfig,
    pub discord: DiscordConfig,
}

impl BlackholeOpts {
    pub fn build(self) -> anyhow::Result<BlackholeConfig> {
        let base_watch_path = std::path::absolute(&self.base_watch_path)
            .with_context(|| format!("invalid base watch path {:?}", self.base_watch_path))?;
        Ok(BlackholeConfig {
            base_watch_path,
            radarr_path: self.radarr_path,
            sonarr_path: self.sonarr_path,
            fail_if_not_cached: self.fail_if_not_cached,
            rd_mount_refresh_seconds: self.rd_mount_refresh_seconds,
            wait_for_torrent_timeout: self.wait_for_torrent_timeout,
            history_page_size: self.history_page_size,
        })
    }
}

impl ServicesOpts {
    pub fn build(self) -> anyhow::Result<ServicesConfig> {
        let realdebrid = build_backend("realdebrid", self.realdebrid.enabled, self.realdebrid.host, self.realdebrid.api_key, self.realdebrid.mount_torrents_path)?;
        let torbox = build_backend("torbox", self.torbox.enabled, self.torbox.host, self.torbox.api_key, self.torbox.mount_torrents_path)?;
        if realdebrid.is_none() && torbox.is_none() {
            anyhow::bail!("at least one debrid backend must be enabled");
        }
        Ok(ServicesConfig {
            realdebrid,
            torbox,
            radarr: ArrInstanceConfig {
                host: self.arr.radarr_host,
                api_key: self.arr.radarr_api_key,
            },
            sonarr: ArrInstanceConfig {
                host: self.arr.sonarr_host,
                api_key: self.arr.sonarr_api_key,
            },
            discord: DiscordConfig {
                enabled: self.discord.enabled,
                update_enabled: self.discord.update_enabled,
                webhook_url: self.discord.webhook_url,
            },
        })
    }
}

fn build_backend(
    name: &str,
    enabled: bool,
    host: Option<Url>,
    api_key: Option<String>,
    mount: Option<PathBuf>,
) -> anyhow::Result<Option<DebridBackendConfig>> {
    if !enabled {
        return Ok(None);
    }
    let mut host = host.with_context(|| format!("{name} is enabled but its host is not set"))?;
    // Base URLs must end with a slash or Url::join drops the last path segment.
    if !host.path().ends_with('/') {
        let path = format!("{}/", host.path());
        host.set_path(&path);
    }
    let api_key =
        api_key.with_context(|| format!("{name} is enabled but its API key is not set"))?;
    let mount =
        mount.with_context(|| format!("{name} is enabled but its mount torrents path is not set"))?;
    let mount = std::path::absolute(&mount)
        .with_context(|| format!("invalid {name} mount torrents path {mount:?}"))?;
    Ok(Some(DebridBackendConfig {
        host,
        api_key,
        mount_torrents_path: mount,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_backend_requires_all_fields_when_enabled() {
        assert!(build_backend("realdebrid", true, None, None, None).is_err());
        assert!(build_backend("realdebrid", false, None, None, None).unwrap().is_none());
    }

    #[test]
    fn test_build_backend_normalizes_host() {
        let cfg = build_backend(
            "realdebrid",
            true,
            Some(Url::parse("https://api.real-debrid.com/rest/1.0").unwrap()),
            Some("key".into()),
            Some(PathBuf::from("/mnt/remote/realdebrid/torrents")),
        )
        .unwrap()
        .unwrap();
        assert_eq!(cfg.host.as_str(), "https://api.real-debrid.com/rest/1.0/");
        assert_eq!(
            cfg.host.join("torrents/info/abc").unwrap().as_str(),
            "https://api.real-debrid.com/rest/1.0/torrents/info/abc"
        );
    }
}
