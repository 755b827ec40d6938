use std::path::{Path, PathBuf};

/// Subdirectory names reserved inside each watch directory.
pub const PROCESSING_DIR: &str = "processing";
pub const COMPLETED_DIR: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Movies,
    Series,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Category::Movies => "movies",
            Category::Series => "series",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentKind {
    DotTorrent,
    Magnet,
}

impl TorrentKind {
    pub fn from_filename(filename: &str) -> Option<TorrentKind> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".torrent") {
            Some(TorrentKind::DotTorrent)
        } else if lower.ends_with(".magnet") {
            Some(TorrentKind::Magnet)
        } else {
            None
        }
    }
}

/// One ingest unit and its three derived locations. The file itself lives at
/// `watch_path` until claimed, then at `processing_path` until the run ends;
/// `completed_dir` receives the symlink tree.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    pub filename: String,
    pub stem: String,
    pub kind: TorrentKind,
    pub category: Category,
    pub watch_path: PathBuf,
    pub processing_path: PathBuf,
    pub completed_dir: PathBuf,
}

impl TorrentFile {
    /// None when the filename is not an ingest candidate (wrong extension,
    /// or one of the reserved directory names).
    pub fn new(watch_dir: &Path, category: Category, filename: &str) -> Option<TorrentFile> {
        if filename == PROCESSING_DIR || filename == COMPLETED_DIR {
            return None;
        }
        let kind = TorrentKind::from_filename(filename)?;
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())?;
        Some(TorrentFile {
            filename: filename.to_owned(),
            stem: stem.clone(),
            kind,
            category,
            watch_path: watch_dir.join(filename),
            processing_path: watch_dir.join(PROCESSING_DIR).join(filename),
            completed_dir: watch_dir.join(COMPLETED_DIR).join(stem),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_detection_is_case_insensitive() {
        assert_eq!(
            TorrentKind::from_filename("a.TORRENT"),
            Some(TorrentKind::DotTorrent)
        );
        assert_eq!(
            TorrentKind::from_filename("a.Magnet"),
            Some(TorrentKind::Magnet)
        );
        assert_eq!(TorrentKind::from_filename("a.mkv"), None);
    }

    #[test]
    fn test_path_derivation() {
        let f = TorrentFile::new(
            Path::new("/watch/movies"),
            Category::Movies,
            "The.Movie.2020.1080p.torrent",
        )
        .unwrap();
        assert_eq!(f.stem, "The.Movie.2020.1080p");
        assert_eq!(f.watch_path, Path::new("/watch/movies/The.Movie.2020.1080p.torrent"));
        assert_eq!(
            f.processing_path,
            Path::new("/watch/movies/processing/The.Movie.2020.1080p.torrent")
        );
        assert_eq!(
            f.completed_dir,
            Path::new("/watch/movies/completed/The.Movie.2020.1080p")
        );
    }

    #[test]
    fn test_reserved_names_are_not_candidates() {
        assert!(TorrentFile::new(Path::new("/w"), Category::Series, "processing").is_none());
        assert!(TorrentFile::new(Path::new("/w"), Category::Series, "completed").is_none());
        assert!(TorrentFile::new(Path::new("/w"), Category::Series, "notes.txt").is_none());
    }
}
