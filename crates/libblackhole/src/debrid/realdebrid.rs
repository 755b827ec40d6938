use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use libblackhole_core::media::is_media_path;

use crate::config::DebridBackendConfig;
use crate::http_utils::{get_json, get_ok, delete_ok, post_form_json, post_form_ok, put_bytes_json, with_retries};

use super::{
    SelectFiles, Submission, TorrentInfo, TorrentInfoFile, TorrentPayload, TorrentRecord,
    TorrentState,
};

pub struct RealDebridClient {
    http: reqwest::Client,
    host: Url,
    mount_torrents_path: PathBuf,
}

#[derive(Deserialize)]
struct AddResponse {
    id: String,
}

#[derive(Deserialize)]
struct AvailableHost {
    host: String,
}

#[derive(Deserialize)]
struct RdTorrentInfo {
    status: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    original_filename: String,
    #[serde(default)]
    files: Vec<RdFile>,
}

#[derive(Deserialize)]
struct RdFile {
    id: i64,
    path: String,
    bytes: u64,
}

impl RealDebridClient {
    pub fn new(cfg: DebridBackendConfig) -> anyhow::Result<RealDebridClient> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))
            .context("realdebrid API key is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        Ok(RealDebridClient {
            http: reqwest::Client::builder()
                .default_headers(headers)
                .build()?,
            host: cfg.host,
            mount_torrents_path: cfg.mount_torrents_path,
        })
    }

    pub fn mount_torrents_path(&self) -> &Path {
        &self.mount_torrents_path
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.host
            .join(path)
            .with_context(|| format!("bad realdebrid endpoint {path:?}"))
    }

    pub async fn validate(&self) -> anyhow::Result<()> {
        let time = self.url("time")?;
        with_retries(|| get_ok(&self.http, &time, &[]))
            .await
            .context("realdebrid host is not responding")?;
        let user = self.url("user")?;
        with_retries(|| get_ok(&self.http, &user, &[]))
            .await
            .context("realdebrid API key was rejected")?;
        Ok(())
    }

    /// For a cached hash, the file-id sets of every cached variant.
    /// None means not cached at all.
    async fn instant_availability(
        &self,
        hash: &str,
    ) -> anyhow::Result<Option<Vec<HashSet<String>>>> {
        let url = self.url(&format!("torrents/instantAvailability/{hash}"))?;
        let value: serde_json::Value = with_retries(|| get_json(&self.http, &url, &[])).await?;
        debug!(availability = %value, "instant availability");
        // Shape: {"<hash>": {"rd": [{"<fileId>": {...}}, ...]}}. Empty
        // results come back as {} or {"<hash>": []}.
        let groups = value
            .as_object()
            .and_then(|by_hash| by_hash.values().next())
            .and_then(|hosters| hosters.as_object())
            .and_then(|hosters| hosters.values().next())
            .and_then(|variants| variants.as_array())
            .map(|variants| {
                variants
                    .iter()
                    .filter_map(|group| group.as_object())
                    .map(|group| group.keys().cloned().collect::<HashSet<_>>())
                    .collect::<Vec<_>>()
            })
            .filter(|groups| !groups.is_empty());
        Ok(groups)
    }

    async fn available_upload_host(&self) -> anyhow::Result<String> {
        let url = self.url("torrents/availableHosts")?;
        let hosts: Vec<AvailableHost> = with_retries(|| get_json(&self.http, &url, &[])).await?;
        hosts
            .into_iter()
            .next()
            .map(|h| h.host)
            .context("realdebrid returned no available upload hosts")
    }

    pub async fn submit(
        &self,
        record: &mut TorrentRecord,
        payload: &TorrentPayload,
    ) -> anyhow::Result<Submission> {
        if record.fail_if_not_cached && !record.incompatible_hash_size {
            match self.instant_availability(&record.hash).await? {
                Some(groups) => record.cached_file_groups = Some(groups),
                None => return Ok(Submission::NotCached),
            }
        }
        let host = self.available_upload_host().await?;
        let query = [("host", host.as_str())];
        let response: AddResponse = match payload {
            TorrentPayload::Torrent { bytes, .. } => {
                let url = self.url("torrents/addTorrent")?;
                with_retries(|| put_bytes_json(&self.http, &url, &query, bytes)).await?
            }
            TorrentPayload::Magnet { uri } => {
                let url = self.url("torrents/addMagnet")?;
                let form = [("magnet", uri.as_str())];
                with_retries(|| post_form_json(&self.http, &url, &query, &form)).await?
            }
        };
        record.backend_id = Some(response.id.clone());
        Ok(Submission::Submitted { id: response.id })
    }

    pub async fn info(&self, id: &str) -> anyhow::Result<TorrentInfo> {
        let url = self.url(&format!("torrents/info/{id}"))?;
        let raw: RdTorrentInfo = with_retries(|| get_json(&self.http, &url, &[])).await?;
        let state = match raw.status.as_str() {
            "waiting_files_selection" => TorrentState::AwaitingFileSelection,
            "magnet_conversion" | "queued" | "downloading" | "compressing" | "uploading" => {
                TorrentState::Downloading
            }
            "downloaded" => TorrentState::Completed,
            "magnet_error" | "error" | "dead" | "virus" => TorrentState::Errored,
            other => {
                debug!(status = other, "unknown realdebrid status, treating as downloading");
                TorrentState::Downloading
            }
        };
        Ok(TorrentInfo {
            state,
            progress: raw.progress,
            filename: raw.filename,
            original_filename: raw.original_filename,
            files: raw
                .files
                .into_iter()
                .map(|f| TorrentInfoFile {
                    id: f.id.to_string(),
                    path: f.path,
                    bytes: f.bytes,
                })
                .collect(),
        })
    }

    pub async fn select_files(
        &self,
        record: &TorrentRecord,
        info: &TorrentInfo,
    ) -> anyhow::Result<SelectFiles> {
        let media_files: Vec<&TorrentInfoFile> = info
            .files
            .iter()
            .filter(|f| is_media_path(&f.path))
            .collect();
        let Some(largest) = media_files.iter().max_by_key(|f| f.bytes) else {
            return Ok(SelectFiles::NoMediaFiles);
        };

        let wanted: HashSet<String> = if record.only_largest_file {
            HashSet::from([largest.id.clone()])
        } else {
            media_files.iter().map(|f| f.id.clone()).collect()
        };
        debug!(?wanted, only_largest = record.only_largest_file, "selecting files");

        if record.fail_if_not_cached && !record.incompatible_hash_size {
            let groups = record.cached_file_groups.as_deref().unwrap_or(&[]);
            if !groups.iter().any(|group| *group == wanted) {
                let cached_with_extras = record
                    .only_largest_file
                    .then(|| {
                        groups
                            .iter()
                            .find(|group| group.contains(&largest.id))
                            .map(|group| group.iter().cloned().collect::<Vec<_>>())
                    })
                    .flatten();
                return Ok(SelectFiles::UncachedFiles { cached_with_extras });
            }
        }

        let id = record
            .backend_id
            .as_deref()
            .context("selecting files before submission")?;
        let url = self.url(&format!("torrents/selectFiles/{id}"))?;
        let files = wanted.iter().cloned().collect::<Vec<_>>().join(",");
        let form = [("files", files.as_str())];
        with_retries(|| post_form_ok(&self.http, &url, &form)).await?;
        Ok(SelectFiles::Done)
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let url = self.url(&format!("torrents/delete/{id}"))?;
        with_retries(|| delete_ok(&self.http, &url, &[])).await
    }
}
