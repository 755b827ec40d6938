use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use notify::Watcher;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, error_span, trace, warn};

use libblackhole_core::spawn_utils::spawn;

use crate::ingest::Blackhole;
use crate::torrent_file::{COMPLETED_DIR, Category, PROCESSING_DIR, TorrentFile};

async fn ingest_adder(blackhole: Arc<Blackhole>, mut rx: UnboundedReceiver<TorrentFile>) {
    while let Some(file) = rx.recv().await {
        let span = error_span!("ingest", category = %file.category, stem = %file.stem);
        let blackhole = blackhole.clone();
        spawn(span, async move {
            blackhole.process_file(file).await;
            Ok(())
        });
    }
}

/// Files left in `processing/` by a previous run go back to the watch root
/// so the startup sweep re-attempts them.
fn requeue_interrupted(watch_dir: &Path) {
    let processing = watch_dir.join(PROCESSING_DIR);
    let Ok(entries) = std::fs::read_dir(&processing) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        if !entry.path().is_file() {
            continue;
        }
        let dest = watch_dir.join(entry.file_name());
        if let Err(e) = std::fs::rename(entry.path(), &dest) {
            warn!("could not requeue {:?}: {e:#}", entry.path());
        }
    }
}

fn eligible_entry(path: &Path, watch_dir: &Path, category: Category) -> Option<TorrentFile> {
    if !path.is_file() {
        return None;
    }
    let filename = path.file_name()?.to_str()?;
    TorrentFile::new(watch_dir, category, filename)
}

fn watch_thread(
    watch_dir: PathBuf,
    category: Category,
    tx: UnboundedSender<TorrentFile>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) -> anyhow::Result<()> {
    fn watch_cb(
        ev: notify::Result<notify::Event>,
        watch_dir: &Path,
        category: Category,
        tx: &UnboundedSender<TorrentFile>,
    ) -> anyhow::Result<()> {
        trace!(event = ?ev, "watch event");
        let ev = ev.context("error event")?;
        if !matches!(ev.kind, notify::EventKind::Create(_)) {
            debug!(kind = ?ev.kind, paths = ?ev.paths, "ignoring event");
            return Ok(());
        }
        ev.paths
            .iter()
            .filter_map(|path| eligible_entry(path, watch_dir, category))
            .for_each(|file| {
                if let Err(e) = tx.send(file) {
                    error!("watch thread couldn't send message: {e:#}");
                }
            });
        Ok(())
    }

    // Sweep what was dropped while nothing was watching.
    for entry in std::fs::read_dir(&watch_dir)
        .with_context(|| format!("error listing {watch_dir:?}"))?
        .filter_map(|e| e.ok())
    {
        let Some(file) = eligible_entry(&entry.path(), &watch_dir, category) else {
            continue;
        };
        if tx.send(file).is_err() {
            debug!(?watch_dir, "watcher thread done");
            return Ok(());
        }
    }

    let mut watcher = {
        let watch_dir = watch_dir.clone();
        notify::recommended_watcher(move |ev| {
            if let Err(e) = watch_cb(ev, &watch_dir, category, &tx) {
                warn!("error processing watch event: {e:#}");
            }
        })
        .context("error creating watcher")?
    };
    watcher
        .watch(&watch_dir, notify::RecursiveMode::NonRecursive)
        .context("error watching")?;
    // Parked until the stop channel fires or its sender is dropped.
    let _ = stop_rx.recv();
    debug!(?watch_dir, "watcher thread done");
    Ok(())
}

/// Watch one category's blackhole directory: bootstrap the reserved
/// subdirectories, sweep pre-existing drops, then follow create events.
/// The notify subscription lives on a dedicated thread; ingest runs start
/// from an async adder task fed through a channel.
pub fn watch_category(
    blackhole: &Arc<Blackhole>,
    category: Category,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let watch_dir = blackhole.cfg().watch_dir(category);
    for sub in [PROCESSING_DIR, COMPLETED_DIR] {
        let dir = watch_dir.join(sub);
        std::fs::create_dir_all(&dir).with_context(|| format!("error creating {dir:?}"))?;
    }
    requeue_interrupted(&watch_dir);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    {
        let blackhole = blackhole.clone();
        spawn(error_span!("ingest_adder", %category), async move {
            ingest_adder(blackhole, rx).await;
            Ok(())
        });
    }

    // A std channel bridges the async cancellation token to the blocking
    // watcher thread; losing the sender stops the thread just the same.
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    let token = cancel.clone();
    spawn(error_span!("watch_cancel", %category), async move {
        token.cancelled().await;
        trace!("cancelling watcher");
        let _ = stop_tx.send(());
        Ok(())
    });

    std::thread::spawn(move || {
        let span = error_span!("watcher", %category);
        span.in_scope(move || {
            if let Err(e) = watch_thread(watch_dir, category, tx, stop_rx) {
                error!("error in watcher thread: {e:#}");
            }
        })
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_interrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_dir = tmp.path();
        let processing = watch_dir.join(PROCESSING_DIR);
        std::fs::create_dir_all(&processing).unwrap();
        std::fs::write(processing.join("Stuck.Grab.torrent"), b"x").unwrap();

        requeue_interrupted(watch_dir);

        assert!(watch_dir.join("Stuck.Grab.torrent").is_file());
        assert_eq!(std::fs::read_dir(&processing).unwrap().count(), 0);
    }

    #[test]
    fn test_eligible_entry_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_dir = tmp.path();
        std::fs::write(watch_dir.join("Show.S01E01.magnet"), b"magnet:?").unwrap();
        std::fs::write(watch_dir.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(watch_dir.join("completed")).unwrap();

        let file = eligible_entry(
            &watch_dir.join("Show.S01E01.magnet"),
            watch_dir,
            Category::Series,
        )
        .unwrap();
        assert_eq!(file.stem, "Show.S01E01");

        assert!(eligible_entry(&watch_dir.join("notes.txt"), watch_dir, Category::Series).is_none());
        assert!(eligible_entry(&watch_dir.join("completed"), watch_dir, Category::Series).is_none());
    }
}
