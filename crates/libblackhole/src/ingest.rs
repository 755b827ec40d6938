use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{Instrument, debug, error, error_span, info, warn};

use libblackhole_core::media;

use crate::arr::ArrClient;
use crate::config::{BlackholeConfig, ServicesConfig};
use crate::debrid::{
    DebridClient, SelectFiles, Submission, TorrentInfo, TorrentPayload, TorrentRecord,
    TorrentState, clients_from_config,
};
use crate::error::IngestError;
use crate::materialize::materialize;
use crate::refresh::{DEFAULT_REFRESH_COUNT, RefreshScheduler};
use crate::torrent_file::{Category, TorrentFile};
use crate::webhook::Notifier;

/// Shared state of the pipeline: configuration, the debrid client pool,
/// one manager client per category, the notifier and the refresh slot.
pub struct Blackhole {
    cfg: BlackholeConfig,
    debrid: Vec<DebridClient>,
    radarr: ArrClient,
    sonarr: ArrClient,
    notifier: Notifier,
    refresh: RefreshScheduler,
}

impl Blackhole {
    pub fn new(
        cfg: BlackholeConfig,
        services: &ServicesConfig,
        notifier: Notifier,
    ) -> anyhow::Result<Arc<Blackhole>> {
        let debrid = clients_from_config(services)?;
        Ok(Arc::new(Blackhole {
            cfg,
            debrid,
            radarr: ArrClient::new(&services.radarr, crate::arr::ArrKind::Radarr)?,
            sonarr: ArrClient::new(&services.sonarr, crate::arr::ArrKind::Sonarr)?,
            notifier,
            refresh: RefreshScheduler::new(),
        }))
    }

    pub fn cfg(&self) -> &BlackholeConfig {
        &self.cfg
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn arr(&self, category: Category) -> &ArrClient {
        match category {
            Category::Movies => &self.radarr,
            Category::Series => &self.sonarr,
        }
    }

    /// Probe every configured service once, at startup. Failures are loud
    /// but not fatal: the services may just be rebooting.
    pub async fn validate(&self) {
        for client in &self.debrid {
            if let Err(e) = client.validate().await {
                warn!(backend = client.name(), "backend validation failed: {e:#}");
            }
            if !client.mount_ok() {
                warn!(
                    backend = client.name(),
                    mount = ?client.mount_torrents_path(),
                    "mount torrents path does not exist or has no children"
                );
            }
        }
    }

    /// Drive one dropped file through the whole pipeline. Never panics the
    /// caller: all errors end here, in the log and the notifier.
    pub async fn process_file(&self, file: TorrentFile) {
        info!("processing {}", file.filename);
        if let Err(e) = self.process_file_inner(&file).await {
            error!("error processing {}: {e:#}", file.stem);
            self.notifier
                .error(&format!("Error processing {}", file.stem), &format!("{e:#}"));
            // Best-effort cleanup so nothing stays behind in processing/.
            let _ = tokio::fs::remove_file(&file.processing_path).await;
        }
    }

    async fn process_file_inner(&self, file: &TorrentFile) -> anyhow::Result<()> {
        // Give the manager a beat to finish writing the file.
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Err(e) = tokio::fs::rename(&file.watch_path, &file.processing_path).await {
            // Someone else claimed it, or it vanished. Not our problem.
            debug!("could not claim {:?}: {e:#}", file.watch_path);
            return Ok(());
        }

        let payload = TorrentPayload::read(file).await?;
        let hash = payload.info_hash()?;
        debug!(hash = %hash, "computed info hash");

        let only_largest_file = match file.category {
            Category::Movies => true,
            Category::Series => media::is_single_episode(&file.filename),
        };

        let arr = self.arr(file.category);
        let success = if self.cfg.fail_if_not_cached {
            self.run_backends_sequential(file, &payload, &hash, only_largest_file, arr)
                .await?
        } else {
            self.run_backends_parallel(file, &payload, &hash, only_largest_file, arr)
                .await?
        };

        tokio::fs::remove_file(&file.processing_path)
            .await
            .with_context(|| format!("error removing {:?}", file.processing_path))?;

        if !success {
            self.fail(file, &hash, arr).await?;
        }
        Ok(())
    }

    /// Cached-required mode: strictly ordered, first success wins, and only
    /// exhausting the list fails the grab.
    async fn run_backends_sequential(
        &self,
        file: &TorrentFile,
        payload: &TorrentPayload,
        hash: &str,
        only_largest_file: bool,
        arr: &ArrClient,
    ) -> anyhow::Result<bool> {
        for client in &self.debrid {
            let record = TorrentRecord::new(hash, only_largest_file, true);
            match self.run_one(client, file, payload, record, arr).await {
                Ok(()) => return Ok(true),
                Err(e) if e.fails_grab() => {
                    warn!(backend = client.name(), "backend failed: {e:#}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    /// Caching optional: all backends race, any winner is enough. Late
    /// finishers re-create the same symlinks.
    async fn run_backends_parallel(
        &self,
        file: &TorrentFile,
        payload: &TorrentPayload,
        hash: &str,
        only_largest_file: bool,
        arr: &ArrClient,
    ) -> anyhow::Result<bool> {
        let runs = self.debrid.iter().map(|client| {
            let record = TorrentRecord::new(hash, only_largest_file, false);
            self.run_one(client, file, payload, record, arr)
        });
        let results = futures::future::join_all(runs).await;
        if results.iter().any(|r| r.is_ok()) {
            return Ok(true);
        }
        // Local failures (symlinking died) abort the ingest without telling
        // the manager the grab was bad.
        for result in results {
            if let Err(e) = result
                && !e.fails_grab()
            {
                return Err(e.into());
            }
        }
        Ok(false)
    }

    async fn run_one(
        &self,
        client: &DebridClient,
        file: &TorrentFile,
        payload: &TorrentPayload,
        mut record: TorrentRecord,
        arr: &ArrClient,
    ) -> Result<(), IngestError> {
        let span = error_span!("backend", backend = client.name());
        async {
            let result = self
                .run_backend(client, file, payload, &mut record, arr)
                .await;
            if let (Err(e), Some(id)) = (&result, &record.backend_id) {
                // Whatever went wrong, the backend job is ours to release.
                debug!("releasing backend torrent {id} after failure: {e:#}");
                if let Err(delete_err) = client.delete(id).await {
                    debug!("error deleting backend torrent {id}: {delete_err:#}");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_backend(
        &self,
        client: &DebridClient,
        file: &TorrentFile,
        payload: &TorrentPayload,
        record: &mut TorrentRecord,
        arr: &ArrClient,
    ) -> Result<(), IngestError> {
        match client.submit(record, payload).await? {
            Submission::NotCached => {
                info!("not instantly available");
                return Err(IngestError::Rejected("torrent is not instantly available"));
            }
            Submission::Submitted { id } => info!(id = %id, "submitted"),
        }

        let mut polls: u64 = 0;
        loop {
            let info = client.info(record).await?;
            record.state = info.state;
            record.progress = info.progress;

            match info.state {
                TorrentState::Initial => unreachable!("backends never report Initial"),
                TorrentState::AwaitingFileSelection => {
                    match client.select_files(record, &info).await? {
                        SelectFiles::Done => {}
                        SelectFiles::NoMediaFiles => {
                            info!("no media files found");
                            return Err(IngestError::Rejected("torrent has no media files"));
                        }
                        SelectFiles::UncachedFiles { cached_with_extras } => {
                            if let Some(extras) = cached_with_extras {
                                info!("extra files required for cache: {}", extras.join(", "));
                                self.notifier.update(
                                    "Extra files required for cache",
                                    &extras.join(", "),
                                );
                            }
                            return Err(IngestError::Rejected(
                                "wanted files are not in the cache",
                            ));
                        }
                    }
                }
                TorrentState::Downloading => {
                    debug!(progress = info.progress, "downloading");
                    if record.incompatible_hash_size && record.fail_if_not_cached {
                        info!("non-cached incompatible hash sized torrent");
                        return Err(IngestError::Rejected(
                            "cannot verify cache status of a non-sha1 hash",
                        ));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                TorrentState::Errored => {
                    return Err(IngestError::Rejected("backend reported an error"));
                }
                TorrentState::Completed => {
                    let mount_dir = self.wait_for_mount(client, file, &info).await?;
                    info!(mount = ?mount_dir, "torrent folder found");
                    materialize(&mount_dir, &file.completed_dir, &file.stem)
                        .map_err(IngestError::Materialize)?;
                    info!("symlinks created");
                    self.notifier.update(
                        &format!("Successfully processed {}", file.stem),
                        "Now available for immediate consumption!",
                    );
                    self.refresh.refresh(arr, DEFAULT_REFRESH_COUNT).await;
                    return Ok(());
                }
            }

            polls += 1;
            if record.fail_if_not_cached && polls >= self.cfg.wait_for_torrent_timeout {
                warn!("torrent timeout: {}", file.stem);
                self.notifier
                    .error("Torrent timeout", &format!("{} - {:?}", file.stem, info.state));
                return Err(IngestError::Timeout("downloading"));
            }
        }
    }

    /// Poll the mount once a second until the completed torrent's folder
    /// becomes visible, for at most `rd_mount_refresh_seconds + 1` looks.
    async fn wait_for_mount(
        &self,
        client: &DebridClient,
        file: &TorrentFile,
        info: &TorrentInfo,
    ) -> Result<std::path::PathBuf, IngestError> {
        debug!("waiting for folders to refresh");
        let attempts = self.cfg.rd_mount_refresh_seconds + 1;
        for attempt in 1..=attempts {
            if let Some(path) = client.resolve_mount_path(info) {
                return Ok(path);
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        warn!("torrent folder not found in filesystem: {}", file.stem);
        self.notifier
            .error("Torrent folder not found in filesystem", &file.stem);
        Err(IngestError::MountNotFound)
    }

    /// Terminal failure: point the manager at the history entries of this
    /// grab so it blocks them and searches for an alternative.
    async fn fail(&self, file: &TorrentFile, hash: &str, arr: &ArrClient) -> anyhow::Result<()> {
        info!("failing grab");
        let history = arr
            .get_history(self.cfg.history_page_size)
            .await
            .context("error fetching history")?;

        let stem_lower = file.stem.to_lowercase();
        let matches: Vec<_> = history
            .iter()
            .filter(|h| {
                h.torrent_info_hash
                    .as_deref()
                    .is_some_and(|x| x.eq_ignore_ascii_case(hash))
                    || media::clean_file_name(&h.source_title.to_lowercase()) == stem_lower
            })
            .collect();

        if matches.is_empty() {
            let message =
                "No history items found to mark as failed. The manager will not grab an alternative.";
            warn!("{message}");
            self.notifier.error(message, &file.stem);
            return Ok(());
        }
        for item in &matches {
            arr.fail_history_item(item.id)
                .await
                .with_context(|| format!("error failing history item {}", item.id))?;
        }
        info!("marked {} history item(s) failed", matches.len());
        Ok(())
    }
}
