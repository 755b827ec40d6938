use std::path::PathBuf;

use anyhow::Context;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::config::ArrInstanceConfig;
use crate::http_utils::{delete_json_ok, get_json, post_json_json, post_ok, put_json_ok, with_retries};
use crate::torrent_file::Category;

/// Which manager flavor a client talks to. Movies are flat (the item is
/// its own single child), series expose one child per season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrKind {
    Radarr,
    Sonarr,
}

impl ArrKind {
    pub fn for_category(category: Category) -> ArrKind {
        match category {
            Category::Movies => ArrKind::Radarr,
            Category::Series => ArrKind::Sonarr,
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            ArrKind::Radarr => "movie",
            ArrKind::Sonarr => "series",
        }
    }

    fn file_endpoint(self) -> &'static str {
        match self {
            ArrKind::Radarr => "moviefile",
            ArrKind::Sonarr => "episodefile",
        }
    }

    fn item_id_param(self) -> &'static str {
        match self {
            ArrKind::Radarr => "movieId",
            ArrKind::Sonarr => "seriesId",
        }
    }
}

/// One managed item, movie or show. The manager's raw document is kept
/// around because updates must round-trip the whole thing.
#[derive(Debug, Clone)]
pub struct ManagedItem {
    kind: ArrKind,
    json: Value,
}

impl ManagedItem {
    fn new(kind: ArrKind, json: Value) -> ManagedItem {
        ManagedItem { kind, json }
    }

    pub fn id(&self) -> i64 {
        self.json["id"].as_i64().unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        self.json["title"].as_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.json["path"].as_str().unwrap_or_default()
    }

    fn seasons(&self) -> impl Iterator<Item = &Value> {
        self.json["seasons"].as_array().into_iter().flatten()
    }

    pub fn children_ids(&self) -> Vec<i64> {
        match self.kind {
            ArrKind::Radarr => vec![self.id()],
            ArrKind::Sonarr => self
                .seasons()
                .filter_map(|s| s["seasonNumber"].as_i64())
                .collect(),
        }
    }

    pub fn monitored_children_ids(&self) -> Vec<i64> {
        match self.kind {
            ArrKind::Radarr => {
                if self.json["monitored"].as_bool().unwrap_or(false) {
                    vec![self.id()]
                } else {
                    vec![]
                }
            }
            ArrKind::Sonarr => self
                .seasons()
                .filter(|s| s["monitored"].as_bool().unwrap_or(false))
                .filter_map(|s| s["seasonNumber"].as_i64())
                .collect(),
        }
    }

    /// Children for which the manager reports every expected file present.
    pub fn fully_available_children_ids(&self) -> Vec<i64> {
        match self.kind {
            ArrKind::Radarr => {
                if self.json["hasFile"].as_bool().unwrap_or(false) {
                    vec![self.id()]
                } else {
                    vec![]
                }
            }
            ArrKind::Sonarr => self
                .seasons()
                .filter(|s| s["statistics"]["percentOfEpisodes"].as_f64() == Some(100.0))
                .filter_map(|s| s["seasonNumber"].as_i64())
                .collect(),
        }
    }

    pub fn has_monitored_children(&self) -> bool {
        !self.monitored_children_ids().is_empty()
    }

    pub fn set_child_monitored(&mut self, child_id: i64, monitored: bool) {
        match self.kind {
            ArrKind::Radarr => {
                self.json["monitored"] = Value::Bool(monitored);
            }
            ArrKind::Sonarr => {
                if let Some(seasons) = self.json["seasons"].as_array_mut() {
                    for season in seasons {
                        if season["seasonNumber"].as_i64() == Some(child_id) {
                            season["monitored"] = Value::Bool(monitored);
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub id: i64,
    pub path: PathBuf,
    pub quality: String,
    pub size: u64,
    /// Season number for episodes, movie id for movies.
    pub parent_child_id: i64,
}

impl MediaFile {
    fn parse(kind: ArrKind, v: &Value) -> MediaFile {
        let parent_child_id = match kind {
            ArrKind::Radarr => v["movieId"].as_i64(),
            ArrKind::Sonarr => v["seasonNumber"].as_i64(),
        };
        MediaFile {
            id: v["id"].as_i64().unwrap_or_default(),
            path: PathBuf::from(v["path"].as_str().unwrap_or_default()),
            quality: v["quality"]["quality"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_owned(),
            size: v["size"].as_u64().unwrap_or_default(),
            parent_child_id: parent_child_id.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    pub event_type: String,
    pub source_title: String,
    pub torrent_info_hash: Option<String>,
    pub reason: Option<String>,
    /// Season number for episode records (needs grandchild details),
    /// movie id for movie records.
    pub parent_child_id: Option<i64>,
    /// Series id for episode records, movie id for movie records.
    pub grandparent_id: Option<i64>,
}

impl HistoryRecord {
    fn parse(kind: ArrKind, v: &Value) -> HistoryRecord {
        let (parent_child_id, grandparent_id) = match kind {
            ArrKind::Radarr => (v["movieId"].as_i64(), v["movieId"].as_i64()),
            ArrKind::Sonarr => (
                v["episode"]["seasonNumber"].as_i64(),
                v["seriesId"].as_i64(),
            ),
        };
        HistoryRecord {
            id: v["id"].as_i64().unwrap_or_default(),
            event_type: v["eventType"].as_str().unwrap_or_default().to_owned(),
            source_title: v["sourceTitle"].as_str().unwrap_or_default().to_owned(),
            torrent_info_hash: v["data"]["torrentInfoHash"].as_str().map(str::to_owned),
            reason: v["data"]["reason"].as_str().map(str::to_owned),
            parent_child_id,
            grandparent_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CommandStatus {
    pub state: CommandState,
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct ArrClient {
    http: reqwest::Client,
    api_base: Url,
    api_key: String,
    kind: ArrKind,
}

impl ArrClient {
    pub fn new(cfg: &ArrInstanceConfig, kind: ArrKind) -> anyhow::Result<ArrClient> {
        let mut base = cfg.host.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let api_base = base.join("api/v3/").context("bad manager host URL")?;
        Ok(ArrClient {
            http: reqwest::Client::new(),
            api_base,
            api_key: cfg.api_key.clone(),
            kind,
        })
    }

    pub fn kind(&self) -> ArrKind {
        self.kind
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.api_base
            .join(path)
            .with_context(|| format!("bad manager endpoint {path:?}"))
    }

    pub async fn get(&self, id: i64) -> anyhow::Result<ManagedItem> {
        let url = self.url(&format!("{}/{}", self.kind.endpoint(), id))?;
        let query = [("apikey", self.api_key.as_str())];
        let json: Value = with_retries(|| get_json(&self.http, &url, &query)).await?;
        Ok(ManagedItem::new(self.kind, json))
    }

    pub async fn get_all(&self) -> anyhow::Result<Vec<ManagedItem>> {
        let url = self.url(self.kind.endpoint())?;
        let query = [("apikey", self.api_key.as_str())];
        let json: Vec<Value> = with_retries(|| get_json(&self.http, &url, &query)).await?;
        Ok(json
            .into_iter()
            .map(|v| ManagedItem::new(self.kind, v))
            .collect())
    }

    /// Write an item back. `moveFiles=true` so path changes take effect.
    pub async fn put(&self, item: &ManagedItem) -> anyhow::Result<()> {
        let url = self.url(&format!("{}/{}", self.kind.endpoint(), item.id()))?;
        let query = [("apikey", self.api_key.as_str()), ("moveFiles", "true")];
        with_retries(|| put_json_ok(&self.http, &url, &query, &item.json)).await
    }

    /// Media files of an item, optionally narrowed to one child.
    pub async fn list_files(
        &self,
        item: &ManagedItem,
        child_id: Option<i64>,
    ) -> anyhow::Result<Vec<MediaFile>> {
        let url = self.url(self.kind.file_endpoint())?;
        let item_id = item.id().to_string();
        let query = [
            ("apikey", self.api_key.as_str()),
            (self.kind.item_id_param(), item_id.as_str()),
        ];
        let json: Vec<Value> = with_retries(|| get_json(&self.http, &url, &query)).await?;
        let mut files: Vec<MediaFile> = json
            .iter()
            .map(|v| MediaFile::parse(self.kind, v))
            .collect();
        if let Some(child_id) = child_id
            && child_id != item.id()
        {
            files.retain(|f| f.parent_child_id == child_id);
        }
        Ok(files)
    }

    pub async fn delete_files(&self, files: &[MediaFile]) -> anyhow::Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let url = self.url(&format!("{}/bulk", self.kind.file_endpoint()))?;
        let query = [("apikey", self.api_key.as_str())];
        let ids: Vec<i64> = files.iter().map(|f| f.id).collect();
        let mut body = serde_json::Map::new();
        body.insert(format!("{}ids", self.kind.file_endpoint()), json!(ids));
        with_retries(|| delete_json_ok(&self.http, &url, &query, &body)).await
    }

    /// The recent, cross-item history feed used to match failed grabs.
    pub async fn get_history(&self, page_size: u32) -> anyhow::Result<Vec<HistoryRecord>> {
        let url = self.url("history")?;
        let page_size = page_size.to_string();
        let query = [
            ("apikey", self.api_key.as_str()),
            ("pageSize", page_size.as_str()),
        ];
        let json: Value = with_retries(|| get_json(&self.http, &url, &query)).await?;
        Ok(json["records"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|v| HistoryRecord::parse(self.kind, v))
            .collect())
    }

    /// Per-item history, optionally narrowed to one child, optionally with
    /// the grandchild (episode/movie) documents included.
    pub async fn get_item_history(
        &self,
        item: &ManagedItem,
        child_id: Option<i64>,
        include_grandchild_details: bool,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        let url = self.url(&format!("history/{}", self.kind.endpoint()))?;
        let item_id = item.id().to_string();
        let child_id = child_id.map(|c| c.to_string());
        let mut query = vec![
            ("apikey", self.api_key.as_str()),
            (self.kind.item_id_param(), item_id.as_str()),
        ];
        if self.kind == ArrKind::Sonarr
            && let Some(child_id) = child_id.as_deref()
        {
            query.push(("seasonNumber", child_id));
        }
        if include_grandchild_details {
            query.push((
                match self.kind {
                    ArrKind::Radarr => "includeMovie",
                    ArrKind::Sonarr => "includeEpisode",
                },
                "true",
            ));
        }
        let json: Vec<Value> = with_retries(|| get_json(&self.http, &url, &query)).await?;
        Ok(json
            .iter()
            .map(|v| HistoryRecord::parse(self.kind, v))
            .collect())
    }

    /// Mark a grab failed so the manager re-searches.
    pub async fn fail_history_item(&self, history_id: i64) -> anyhow::Result<()> {
        let url = self.url(&format!("history/failed/{history_id}"))?;
        let query = [("apikey", self.api_key.as_str())];
        with_retries(|| post_ok(&self.http, &url, &query)).await
    }

    pub async fn refresh_monitored_downloads(&self) -> anyhow::Result<()> {
        self.command(&json!({ "name": "RefreshMonitoredDownloads" }))
            .await?;
        Ok(())
    }

    /// Kick off an automatic search, returning the command id to poll.
    pub async fn automatic_search(
        &self,
        item: &ManagedItem,
        child_id: i64,
    ) -> anyhow::Result<i64> {
        let body = match self.kind {
            ArrKind::Radarr => json!({ "name": "MoviesSearch", "movieIds": [item.id()] }),
            ArrKind::Sonarr => json!({
                "name": "SeasonSearch",
                "seriesId": item.id(),
                "seasonNumber": child_id,
            }),
        };
        let response = self.command(&body).await?;
        response["id"]
            .as_i64()
            .context("search command response has no id")
    }

    pub async fn command_status(&self, command_id: i64) -> anyhow::Result<CommandStatus> {
        let url = self.url(&format!("command/{command_id}"))?;
        let query = [("apikey", self.api_key.as_str())];
        let json: Value = with_retries(|| get_json(&self.http, &url, &query)).await?;
        let state = match json["status"].as_str().unwrap_or_default() {
            "queued" => CommandState::Queued,
            "started" | "running" => CommandState::Running,
            "completed" => CommandState::Completed,
            "failed" | "aborted" | "cancelled" | "orphaned" => CommandState::Failed,
            other => {
                debug!(status = other, "unknown command status");
                CommandState::Running
            }
        };
        Ok(CommandStatus {
            state,
            message: json["message"].as_str().map(str::to_owned),
        })
    }

    async fn command(&self, body: &Value) -> anyhow::Result<Value> {
        let url = self.url("command")?;
        let query = [("apikey", self.api_key.as_str())];
        with_retries(|| post_json_json(&self.http, &url, &query, body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show() -> ManagedItem {
        ManagedItem::new(
            ArrKind::Sonarr,
            json!({
                "id": 42,
                "title": "Show Name",
                "path": "/tv/Show Name",
                "seasons": [
                    { "seasonNumber": 1, "monitored": true,
                      "statistics": { "percentOfEpisodes": 100.0 } },
                    { "seasonNumber": 2, "monitored": false,
                      "statistics": { "percentOfEpisodes": 50.0 } },
                    { "seasonNumber": 3, "monitored": true,
                      "statistics": { "percentOfEpisodes": 0.0 } },
                ],
            }),
        )
    }

    #[test]
    fn test_show_children() {
        let show = show();
        assert_eq!(show.children_ids(), vec![1, 2, 3]);
        assert_eq!(show.monitored_children_ids(), vec![1, 3]);
        assert_eq!(show.fully_available_children_ids(), vec![1]);
        assert!(show.has_monitored_children());
    }

    #[test]
    fn test_show_set_child_monitored() {
        let mut show = show();
        show.set_child_monitored(3, false);
        assert_eq!(show.monitored_children_ids(), vec![1]);
        show.set_child_monitored(3, true);
        assert_eq!(show.monitored_children_ids(), vec![1, 3]);
    }

    #[test]
    fn test_movie_children_mirror_item() {
        let movie = ManagedItem::new(
            ArrKind::Radarr,
            json!({ "id": 7, "title": "The Movie", "path": "/movies/The Movie",
                    "monitored": true, "hasFile": false }),
        );
        assert_eq!(movie.children_ids(), vec![7]);
        assert_eq!(movie.monitored_children_ids(), vec![7]);
        assert!(movie.fully_available_children_ids().is_empty());

        let mut movie = movie;
        movie.set_child_monitored(7, false);
        assert!(movie.monitored_children_ids().is_empty());
    }

    #[test]
    fn test_history_record_parsing() {
        let record = HistoryRecord::parse(
            ArrKind::Sonarr,
            &json!({
                "id": 9, "eventType": "episodeFileDeleted",
                "sourceTitle": "Show.S01E01.1080p",
                "seriesId": 42,
                "episode": { "seasonNumber": 1 },
                "data": { "reason": "MissingFromDisk" },
            }),
        );
        assert_eq!(record.reason.as_deref(), Some("MissingFromDisk"));
        assert_eq!(record.parent_child_id, Some(1));
        assert_eq!(record.grandparent_id, Some(42));
        assert!(record.torrent_info_hash.is_none());
    }

    #[test]
    fn test_media_file_parsing() {
        let file = MediaFile::parse(
            ArrKind::Radarr,
            &json!({
                "id": 11, "movieId": 7, "path": "/movies/The Movie/movie.mkv",
                "size": 123456u64,
                "quality": { "quality": { "name": "Bluray-1080p" } },
            }),
        );
        assert_eq!(file.id, 11);
        assert_eq!(file.parent_child_id, 7);
        assert_eq!(file.quality, "Bluray-1080p");
    }
}
