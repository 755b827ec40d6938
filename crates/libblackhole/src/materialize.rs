use std::path::Path;

use anyhow::Context;
use tracing::debug;
use walkdir::WalkDir;

use libblackhole_core::media;

/// Mirror a completed torrent's mount directory into the manager's
/// completed tree as absolute symlinks.
///
/// Multi-season packs get split: when the stem names a season range and a
/// file carries an `SxxEyy` tag, its link lands in a per-season completed
/// directory derived by rewriting the range in the stem to that season.
/// Existing links are replaced, so replaying a materialization (or racing
/// another backend for the same grab) converges on the same tree.
pub fn materialize(mount_dir: &Path, completed_dir: &Path, stem: &str) -> anyhow::Result<()> {
    let multi_season = media::is_multi_season(stem);
    let completed_parent = completed_dir
        .parent()
        .context("completed dir has no parent")?;

    for entry in WalkDir::new(mount_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(mount_dir)
            .context("walked outside the mount dir")?;
        let filename = entry.file_name().to_string_lossy();

        let season = multi_season
            .then(|| media::episode_season(&filename))
            .flatten();
        let dest = match season {
            Some(season) => completed_parent
                .join(media::season_folder_stem(stem, season))
                .join(rel),
            None => completed_dir.join(rel),
        };

        link_into(entry.path(), &dest)?;
        debug!(link = ?dest, target = ?entry.path(), "created symlink");
    }
    Ok(())
}

fn link_into(target: &Path, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("error creating {parent:?}"))?;
    }
    if std::fs::symlink_metadata(dest).is_ok() {
        std::fs::remove_file(dest).with_context(|| format!("error replacing {dest:?}"))?;
    }
    std::os::unix::fs::symlink(target, dest)
        .with_context(|| format!("error creating symlink {dest:?} -> {target:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Fixture {
        _tmp: tempfile::TempDir,
        mount: PathBuf,
        completed: PathBuf,
    }

    fn fixture(stem: &str, mount_files: &[&str]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let mount = tmp.path().join("mount").join(stem);
        for file in mount_files {
            let path = mount.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"x").unwrap();
        }
        let completed = tmp.path().join("completed").join(stem);
        std::fs::create_dir_all(completed.parent().unwrap()).unwrap();
        Fixture {
            _tmp: tmp,
            mount,
            completed,
        }
    }

    #[test]
    fn test_single_movie() {
        let stem = "The.Movie.2020.1080p";
        let f = fixture(stem, &["The.Movie.2020.1080p.mkv"]);
        materialize(&f.mount, &f.completed, stem).unwrap();

        let link = f.completed.join("The.Movie.2020.1080p.mkv");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            f.mount.join("The.Movie.2020.1080p.mkv")
        );
    }

    #[test]
    fn test_nested_structure_is_preserved() {
        let stem = "Show.S01.1080p";
        let f = fixture(stem, &["Subs/eng.srt", "Show.S01E01.mkv"]);
        materialize(&f.mount, &f.completed, stem).unwrap();

        assert!(f.completed.join("Show.S01E01.mkv").is_symlink());
        assert!(f.completed.join("Subs/eng.srt").is_symlink());
    }

    #[test]
    fn test_replay_is_idempotent() {
        let stem = "The.Movie.2020.1080p";
        let f = fixture(stem, &["The.Movie.2020.1080p.mkv"]);
        materialize(&f.mount, &f.completed, stem).unwrap();
        materialize(&f.mount, &f.completed, stem).unwrap();

        let entries: Vec<_> = std::fs::read_dir(&f.completed).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(f.completed.join("The.Movie.2020.1080p.mkv").is_symlink());
    }

    #[test]
    fn test_multi_season_pack_splits_per_season() {
        let stem = "Show.Name.S01.S02.1080p";
        let f = fixture(
            stem,
            &["Show.Name.S01E01.mkv", "Show.Name.S01E02.mkv", "Show.Name.S02E01.mkv"],
        );
        materialize(&f.mount, &f.completed, stem).unwrap();

        let completed_root = f.completed.parent().unwrap();
        let s01 = completed_root.join("Show.Name.S01.1080p");
        let s02 = completed_root.join("Show.Name.S02.1080p");
        assert!(s01.join("Show.Name.S01E01.mkv").is_symlink());
        assert!(s01.join("Show.Name.S01E02.mkv").is_symlink());
        assert!(s02.join("Show.Name.S02E01.mkv").is_symlink());
        // One directory per distinct season.
        assert!(!f.completed.exists());
        assert_eq!(std::fs::read_dir(s01).unwrap().count(), 2);
        assert_eq!(std::fs::read_dir(s02).unwrap().count(), 1);
    }

    #[test]
    fn test_multi_season_file_without_episode_tag_stays_in_stem_dir() {
        let stem = "Show.Name.S01.S02.1080p";
        let f = fixture(stem, &["extras/featurette.mkv"]);
        materialize(&f.mount, &f.completed, stem).unwrap();
        assert!(f.completed.join("extras/featurette.mkv").is_symlink());
    }
}
