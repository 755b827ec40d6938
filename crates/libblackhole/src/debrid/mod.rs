pub mod realdebrid;
pub mod torbox;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::ServicesConfig;
use crate::torrent_file::{TorrentFile, TorrentKind};

pub use realdebrid::RealDebridClient;
pub use torbox::TorboxClient;

/// Canonical torrent states every backend's status vocabulary maps into.
/// `Initial` only ever appears on a [`TorrentRecord`] before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    Initial,
    AwaitingFileSelection,
    Downloading,
    Completed,
    Errored,
}

#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub state: TorrentState,
    /// Percent, 0..=100.
    pub progress: f64,
    pub filename: String,
    pub original_filename: String,
    pub files: Vec<TorrentInfoFile>,
}

#[derive(Debug, Clone)]
pub struct TorrentInfoFile {
    pub id: String,
    pub path: String,
    pub bytes: u64,
}

/// Per-(file, backend) bookkeeping, owned by the ingest run.
#[derive(Debug)]
pub struct TorrentRecord {
    pub backend_id: Option<String>,
    pub state: TorrentState,
    pub progress: f64,
    pub hash: String,
    /// Hash is not 40 hex chars, so SHA-1-keyed availability lookups are
    /// meaningless for it.
    pub incompatible_hash_size: bool,
    pub only_largest_file: bool,
    pub fail_if_not_cached: bool,
    /// RealDebrid instant-availability variants: for each cached variant,
    /// the set of file ids it contains.
    pub(crate) cached_file_groups: Option<Vec<HashSet<String>>>,
}

impl TorrentRecord {
    pub fn new(hash: &str, only_largest_file: bool, fail_if_not_cached: bool) -> TorrentRecord {
        TorrentRecord {
            backend_id: None,
            state: TorrentState::Initial,
            progress: 0.0,
            hash: hash.to_owned(),
            incompatible_hash_size: hash.len() != 40,
            only_largest_file,
            fail_if_not_cached,
            cached_file_groups: None,
        }
    }
}

/// The raw contents of a dropped grab artifact.
pub enum TorrentPayload {
    Torrent { filename: String, bytes: Vec<u8> },
    Magnet { uri: String },
}

impl TorrentPayload {
    pub async fn read(file: &TorrentFile) -> anyhow::Result<TorrentPayload> {
        match file.kind {
            TorrentKind::DotTorrent => {
                let bytes = tokio::fs::read(&file.processing_path)
                    .await
                    .with_context(|| format!("error reading {:?}", file.processing_path))?;
                Ok(TorrentPayload::Torrent {
                    filename: file.filename.clone(),
                    bytes,
                })
            }
            TorrentKind::Magnet => {
                let uri = tokio::fs::read_to_string(&file.processing_path)
                    .await
                    .with_context(|| format!("error reading {:?}", file.processing_path))?;
                Ok(TorrentPayload::Magnet {
                    uri: uri.trim().to_owned(),
                })
            }
        }
    }

    /// SHA-1 of the bencoded info dict for `.torrent` payloads, the BTIH
    /// from the magnet link otherwise.
    pub fn info_hash(&self) -> anyhow::Result<String> {
        match self {
            TorrentPayload::Torrent { bytes, .. } => {
                libblackhole_core::metainfo::torrent_info_hash(bytes)
                    .context("error computing torrent info hash")
            }
            TorrentPayload::Magnet { uri } => Ok(libblackhole_core::magnet::Magnet::parse(uri)
                .context("error parsing magnet link")?
                .info_hash()
                .to_owned()),
        }
    }
}

#[derive(Debug)]
pub enum Submission {
    Submitted { id: String },
    NotCached,
}

#[derive(Debug)]
pub enum SelectFiles {
    Done,
    NoMediaFiles,
    /// The wanted file set is not present in any cached variant. When only
    /// the largest file was wanted, `cached_with_extras` names a variant
    /// that has it bundled with extra files.
    UncachedFiles {
        cached_with_extras: Option<Vec<String>>,
    },
}

pub enum DebridClient {
    RealDebrid(RealDebridClient),
    Torbox(TorboxClient),
}

impl DebridClient {
    pub fn name(&self) -> &'static str {
        match self {
            DebridClient::RealDebrid(_) => "realdebrid",
            DebridClient::Torbox(_) => "torbox",
        }
    }

    pub fn mount_torrents_path(&self) -> &Path {
        match self {
            DebridClient::RealDebrid(c) => c.mount_torrents_path(),
            DebridClient::Torbox(c) => c.mount_torrents_path(),
        }
    }

    /// Host health + auth probe, used at startup.
    pub async fn validate(&self) -> anyhow::Result<()> {
        match self {
            DebridClient::RealDebrid(c) => c.validate().await,
            DebridClient::Torbox(c) => c.validate().await,
        }
    }

    /// The mount is serving: the torrents path exists and contains at
    /// least one directory.
    pub fn mount_ok(&self) -> bool {
        std::fs::read_dir(self.mount_torrents_path())
            .map(|mut entries| {
                entries.any(|e| e.map(|e| e.path().is_dir()).unwrap_or(false))
            })
            .unwrap_or(false)
    }

    pub async fn submit(
        &self,
        record: &mut TorrentRecord,
        payload: &TorrentPayload,
    ) -> anyhow::Result<Submission> {
        match self {
            DebridClient::RealDebrid(c) => c.submit(record, payload).await,
            DebridClient::Torbox(c) => c.submit(record, payload).await,
        }
    }

    pub async fn info(&self, record: &TorrentRecord) -> anyhow::Result<TorrentInfo> {
        let id = backend_id(record)?;
        match self {
            DebridClient::RealDebrid(c) => c.info(id).await,
            DebridClient::Torbox(c) => c.info(id).await,
        }
    }

    pub async fn select_files(
        &self,
        record: &TorrentRecord,
        info: &TorrentInfo,
    ) -> anyhow::Result<SelectFiles> {
        match self {
            DebridClient::RealDebrid(c) => c.select_files(record, info).await,
            // Torbox picks files on its own.
            DebridClient::Torbox(_) => Ok(SelectFiles::Done),
        }
    }

    /// Where a completed torrent shows up under the mount, if visible yet.
    pub fn resolve_mount_path(&self, info: &TorrentInfo) -> Option<PathBuf> {
        resolve_mount_path(self.mount_torrents_path(), info)
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        match self {
            DebridClient::RealDebrid(c) => c.delete(id).await,
            DebridClient::Torbox(c) => c.delete(id).await,
        }
    }

    /// Whether a library symlink pointing under this backend's mount is
    /// broken. RealDebrid targets are plain paths, so the target itself is
    /// checked; the Torbox mount serves through a path rewrite, so the
    /// link is resolved from the library side instead.
    pub fn symlink_target_broken(&self, link_path: &Path, target: &Path) -> bool {
        if !target.starts_with(self.mount_torrents_path()) {
            return false;
        }
        match self {
            DebridClient::RealDebrid(_) => !target.exists(),
            DebridClient::Torbox(_) => match std::fs::canonicalize(link_path) {
                Ok(resolved) => !resolved.exists(),
                Err(_) => true,
            },
        }
    }
}

/// Enabled backends in the fixed fallback order.
pub fn clients_from_config(cfg: &ServicesConfig) -> anyhow::Result<Vec<DebridClient>> {
    let mut clients = Vec::new();
    if let Some(rd) = &cfg.realdebrid {
        clients.push(DebridClient::RealDebrid(RealDebridClient::new(rd.clone())?));
    }
    if let Some(tb) = &cfg.torbox {
        clients.push(DebridClient::Torbox(TorboxClient::new(tb.clone())?));
    }
    Ok(clients)
}

fn backend_id(record: &TorrentRecord) -> anyhow::Result<&str> {
    record
        .backend_id
        .as_deref()
        .context("torrent has no backend id; submit it first")
}

fn resolve_mount_path(mount: &Path, info: &TorrentInfo) -> Option<PathBuf> {
    let mut candidates: Vec<&str> = vec![&info.filename];
    if !info.original_filename.is_empty() {
        candidates.push(&info.original_filename);
    }
    let original_lower = info.original_filename.to_ascii_lowercase();
    let original_stem;
    if original_lower.ends_with(".mkv") || original_lower.ends_with(".mp4") {
        original_stem = &info.original_filename[..info.original_filename.len() - 4];
        candidates.push(original_stem);
    }
    for candidate in candidates {
        if candidate.is_empty() {
            continue;
        }
        let path = mount.join(candidate);
        if dir_non_empty(&path) {
            return Some(path);
        }
    }
    None
}

fn dir_non_empty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flags_incompatible_hash() {
        let sha1 = TorrentRecord::new("a621779b5e3d486e127c3efbca9b6f8d135f52e5", true, true);
        assert!(!sha1.incompatible_hash_size);
        let base32 = TorrentRecord::new("UKRGPQFQ64JTSWLYDSGEZCUBAHFJ3LBN", true, true);
        assert!(base32.incompatible_hash_size);
    }

    #[test]
    fn test_resolve_mount_path_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = tmp.path();
        std::fs::create_dir(mount.join("Original.Name")).unwrap();
        std::fs::write(mount.join("Original.Name/file.mkv"), b"x").unwrap();

        let info = TorrentInfo {
            state: TorrentState::Completed,
            progress: 100.0,
            filename: "Renamed".into(),
            original_filename: "Original.Name.mkv".into(),
            files: vec![],
        };
        // filename dir absent, original ends in .mkv -> stem candidate wins.
        assert_eq!(
            resolve_mount_path(mount, &info),
            Some(mount.join("Original.Name"))
        );
    }

    #[tokio::test]
    async fn test_payload_read_magnet() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_dir = tmp.path();
        std::fs::create_dir_all(watch_dir.join("processing")).unwrap();

        let file = TorrentFile::new(
            watch_dir,
            crate::torrent_file::Category::Movies,
            "The.Movie.2020.1080p.magnet",
        )
        .unwrap();
        std::fs::write(
            &file.processing_path,
            "magnet:?xt=urn:btih:a621779b5e3d486e127c3efbca9b6f8d135f52e5&dn=The.Movie\n",
        )
        .unwrap();

        let payload = TorrentPayload::read(&file).await.unwrap();
        assert_eq!(
            payload.info_hash().unwrap(),
            "a621779b5e3d486e127c3efbca9b6f8d135f52e5"
        );
    }

    #[test]
    fn test_symlink_target_broken() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = tmp.path().join("mount");
        let library = tmp.path().join("library");
        std::fs::create_dir_all(&mount).unwrap();
        std::fs::create_dir_all(&library).unwrap();

        let client = DebridClient::RealDebrid(
            RealDebridClient::new(crate::config::DebridBackendConfig {
                host: url::Url::parse("https://api.real-debrid.com/rest/1.0/").unwrap(),
                api_key: "key".into(),
                mount_torrents_path: mount.clone(),
            })
            .unwrap(),
        );

        let live_target = mount.join("Pack/file.mkv");
        std::fs::create_dir_all(live_target.parent().unwrap()).unwrap();
        std::fs::write(&live_target, b"x").unwrap();
        let live_link = library.join("live.mkv");
        std::os::unix::fs::symlink(&live_target, &live_link).unwrap();
        assert!(!client.symlink_target_broken(&live_link, &live_target));

        let dead_target = mount.join("Gone/file.mkv");
        let dead_link = library.join("dead.mkv");
        std::os::unix::fs::symlink(&dead_target, &dead_link).unwrap();
        assert!(client.symlink_target_broken(&dead_link, &dead_target));

        // Targets outside the mount are someone else's business.
        let foreign_target = tmp.path().join("elsewhere/file.mkv");
        assert!(!client.symlink_target_broken(&dead_link, &foreign_target));
    }

    #[test]
    fn test_resolve_mount_path_ignores_empty_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("Empty")).unwrap();
        let info = TorrentInfo {
            state: TorrentState::Completed,
            progress: 100.0,
            filename: "Empty".into(),
            original_filename: String::new(),
            files: vec![],
        };
        assert_eq!(resolve_mount_path(tmp.path(), &info), None);
    }
}
