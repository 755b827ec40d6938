use std::path::{Path, PathBuf};

use anyhow::Context;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::DebridBackendConfig;
use crate::http_utils::{delete_form_ok, get_json, get_ok, json_response, post_form_json, with_retries};

use super::{Submission, TorrentInfo, TorrentInfoFile, TorrentPayload, TorrentRecord, TorrentState};

pub struct TorboxClient {
    http: reqwest::Client,
    host: Url,
    mount_torrents_path: PathBuf,
}

#[derive(Deserialize)]
struct CreateResponse {
    data: CreateData,
}

#[derive(Deserialize)]
struct CreateData {
    torrent_id: i64,
}

#[derive(Deserialize)]
struct MyListResponse {
    #[serde(default)]
    data: Vec<TbTorrent>,
}

#[derive(Deserialize)]
struct TbTorrent {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    download_state: String,
    #[serde(default)]
    download_finished: bool,
    /// Fraction, 0..=1.
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    files: Vec<TbFile>,
}

#[derive(Deserialize)]
struct TbFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
}

impl TorboxClient {
    pub fn new(cfg: DebridBackendConfig) -> anyhow::Result<TorboxClient> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))
            .context("torbox API key is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        Ok(TorboxClient {
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
            .with_context(|| format!("bad torbox endpoint {path:?}"))
    }

    pub async fn validate(&self) -> anyhow::Result<()> {
        let stats = self.url("stats")?;
        with_retries(|| get_ok(&self.http, &stats, &[]))
            .await
            .context("torbox host is not responding")?;
        let me = self.url("user/me")?;
        with_retries(|| get_ok(&self.http, &me, &[]))
            .await
            .context("torbox API key was rejected")?;
        Ok(())
    }

    async fn check_cached(&self, hash: &str) -> anyhow::Result<bool> {
        let url = self.url("torrents/checkcached")?;
        let query = [("hash", hash), ("format", "object")];
        let value: serde_json::Value = with_retries(|| get_json(&self.http, &url, &query)).await?;
        debug!(cached = %value, "check cached");
        let cached = match value.pointer("/data/data") {
            Some(inner) => {
                !matches!(inner, serde_json::Value::Bool(false) | serde_json::Value::Null)
            }
            None => false,
        };
        Ok(cached)
    }

    async fn create_torrent_once(
        &self,
        url: &Url,
        filename: &str,
        bytes: &[u8],
    ) -> anyhow::Result<CreateResponse> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_owned())
            .mime_str("application/x-bittorrent")?;
        let form = reqwest::multipart::Form::new().part("file", part);
        json_response(self.http.post(url.clone()).multipart(form).send().await?).await
    }

    pub async fn submit(
        &self,
        record: &mut TorrentRecord,
        payload: &TorrentPayload,
    ) -> anyhow::Result<Submission> {
        // Availability of a non-SHA1 hash is unknowable here; submission
        // proceeds and the downloading-state guard handles the rest.
        if record.fail_if_not_cached
            && !record.incompatible_hash_size
            && !self.check_cached(&record.hash).await?
        {
            return Ok(Submission::NotCached);
        }
        let url = self.url("torrents/createtorrent")?;
        let response: CreateResponse = match payload {
            TorrentPayload::Torrent { filename, bytes } => {
                with_retries(|| self.create_torrent_once(&url, filename, bytes)).await?
            }
            TorrentPayload::Magnet { uri } => {
                let form = [("magnet", uri.as_str())];
                with_retries(|| post_form_json(&self.http, &url, &[], &form)).await?
            }
        };
        let id = response.data.torrent_id.to_string();
        record.backend_id = Some(id.clone());
        Ok(Submission::Submitted { id })
    }

    pub async fn info(&self, id: &str) -> anyhow::Result<TorrentInfo> {
        let url = self.url("torrents/mylist")?;
        let list: MyListResponse = with_retries(|| get_json(&self.http, &url, &[])).await?;
        let torrent = list
            .data
            .into_iter()
            .find(|t| t.id.to_string() == id)
            .with_context(|| format!("torrent {id} not in torbox list"))?;
        let state = if torrent.download_finished {
            TorrentState::Completed
        } else {
            match torrent.download_state.as_str() {
                "paused" | "downloading" | "uploading" => TorrentState::Downloading,
                "error" | "stalled (no seeds)" => TorrentState::Errored,
                other => {
                    debug!(status = other, "unknown torbox status, treating as downloading");
                    TorrentState::Downloading
                }
            }
        };
        Ok(TorrentInfo {
            state,
            progress: torrent.progress * 100.0,
            filename: torrent.name,
            original_filename: String::new(),
            files: torrent
                .files
                .into_iter()
                .enumerate()
                .map(|(idx, f)| TorrentInfoFile {
                    id: idx.to_string(),
                    path: f.name,
                    bytes: f.size,
                })
                .collect(),
        })
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let url = self.url("torrents/controltorrent")?;
        let form = [("torrent_id", id), ("operation", "Delete")];
        with_retries(|| delete_form_ok(&self.http, &url, &form)).await
    }
}
