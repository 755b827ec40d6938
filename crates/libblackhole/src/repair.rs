use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use itertools::Itertools;
use tokio_util::sync::CancellationToken;
use tracing::{debug_span, error, info, warn};

use libblackhole_core::spawn_utils::spawn_with_cancel;

use crate::arr::{ArrClient, ArrKind, CommandState, ManagedItem};
use crate::config::ServicesConfig;
use crate::debrid::{DebridClient, clients_from_config};
use crate::webhook::Notifier;

const SEARCH_CONFIRM_ATTEMPTS: u32 = 3;
const SEARCH_CONFIRM_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RepairMode {
    /// Find library symlinks whose mount target is gone.
    Symlink,
    /// Find items the manager reports missing from disk.
    File,
}

impl std::fmt::Display for RepairMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RepairMode::Symlink => "symlink",
            RepairMode::File => "file",
        })
    }
}

#[derive(Debug, Clone)]
pub struct RepairOpts {
    pub dry_run: bool,
    pub no_confirm: bool,
    pub mode: RepairMode,
    /// Pause between successive repair actions within a pass.
    pub repair_interval: Duration,
    /// How often a full pass starts. Zero runs one pass and exits.
    pub run_interval: Duration,
    pub season_packs: bool,
    pub include_unmonitored: bool,
}

struct PendingReport {
    title: String,
    child_id: i64,
    folders: BTreeSet<PathBuf>,
}

/// Walks every managed item, spots broken media and drives the managers'
/// delete → unmonitor → re-monitor → re-search cycle. Deliberately
/// single-threaded: one pass at a time, one repair at a time, so the
/// search-command bookkeeping stays trivial.
pub struct RepairEngine {
    opts: RepairOpts,
    radarr: ArrClient,
    sonarr: ArrClient,
    debrid: Vec<DebridClient>,
    notifier: Notifier,
    cancel: CancellationToken,
}

impl RepairEngine {
    pub fn new(
        opts: RepairOpts,
        services: &ServicesConfig,
        notifier: Notifier,
        cancel: CancellationToken,
    ) -> anyhow::Result<RepairEngine> {
        Ok(RepairEngine {
            opts,
            radarr: ArrClient::new(&services.radarr, ArrKind::Radarr)?,
            sonarr: ArrClient::new(&services.sonarr, ArrKind::Sonarr)?,
            debrid: clients_from_config(services)?,
            notifier,
            cancel,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        if self.opts.run_interval.is_zero() {
            info!("running repair once");
            return self.run_pass().await;
        }
        info!(
            "running repair every {:?}, waiting {:?} between repairs",
            self.opts.run_interval, self.opts.repair_interval
        );
        loop {
            if let Err(e) = self.run_pass().await {
                error!("error in repair pass: {e:#}");
                self.notifier
                    .error(&format!("[{}] Error in repair pass", self.opts.mode), &format!("{e:#}"));
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.opts.run_interval) => {}
            }
        }
    }

    async fn run_pass(&self) -> anyhow::Result<()> {
        if self.mounts_unsafe() {
            let message = "One or both debrid services are not working properly. Skipping repair.";
            warn!("{message}");
            self.notifier
                .error(&format!("[{}] {message}", self.opts.mode), "");
            return Ok(());
        }

        info!("collecting media");
        let movies = self.collect(&self.radarr).await?;
        let shows = self.collect(&self.sonarr).await?;
        info!(movies = movies.len(), shows = shows.len(), "finished collecting media");

        let mut pending: Vec<PendingReport> = Vec::new();
        for (arr, item) in movies
            .into_iter()
            .map(|m| (&self.radarr, m))
            .interleave(shows.into_iter().map(|s| (&self.sonarr, s)))
        {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if self.mounts_unsafe() {
                let message =
                    "One or both debrid services are not working properly. Skipping repair.";
                warn!("{message}");
                self.notifier
                    .error(&format!("[{}] {message}", self.opts.mode), "");
                return Ok(());
            }
            let title = item.title().to_owned();
            if let Err(e) = self.repair_item(arr, item, &mut pending).await {
                error!("error processing {title}: {e:#}");
                self.notifier.error(
                    &format!("[{}] Error processing {title}", self.opts.mode),
                    &format!("{e:#}"),
                );
            }
        }

        for report in &pending {
            info!(
                "inconsistent folders for {} (child {}): {}",
                report.title,
                report.child_id,
                report.folders.iter().map(|p| p.display()).join(", ")
            );
        }
        if !pending.is_empty() {
            let body = pending
                .iter()
                .map(|r| {
                    format!(
                        "{} (child {}): {}",
                        r.title,
                        r.child_id,
                        r.folders.iter().map(|p| p.display()).join(", ")
                    )
                })
                .join("\n");
            self.notifier
                .update(&format!("[{}] Fragmented seasons", self.opts.mode), &body);
        }

        info!("repair complete");
        self.notifier
            .update(&format!("[{}] Repair complete", self.opts.mode), "");
        Ok(())
    }

    async fn collect(&self, arr: &ArrClient) -> anyhow::Result<Vec<ManagedItem>> {
        let mut items = arr.get_all().await?;
        if !self.opts.include_unmonitored {
            items.retain(|i| i.has_monitored_children());
        }
        Ok(items)
    }

    async fn repair_item(
        &self,
        arr: &ArrClient,
        item: ManagedItem,
        pending: &mut Vec<PendingReport>,
    ) -> anyhow::Result<()> {
        let children = if self.opts.include_unmonitored {
            item.children_ids()
        } else {
            item.monitored_children_ids()
        };
        for child_id in children {
            match self.opts.mode {
                RepairMode::Symlink => {
                    self.repair_child_symlinks(arr, &item, child_id, pending)
                        .await?
                }
                RepairMode::File => self.repair_child_files(arr, &item, child_id).await?,
            }
        }
        Ok(())
    }

    async fn repair_child_symlinks(
        &self,
        arr: &ArrClient,
        item: &ManagedItem,
        child_id: i64,
        pending: &mut Vec<PendingReport>,
    ) -> anyhow::Result<()> {
        let files = arr.list_files(item, Some(child_id)).await?;
        let broken: Vec<PathBuf> = files
            .iter()
            .filter(|f| self.symlink_broken(&f.path))
            .map(|f| f.path.clone())
            .collect();

        if broken.is_empty() {
            // A fully available season scattered over several mount folders
            // was grabbed piecemeal; a season pack would consolidate it.
            let folders: BTreeSet<PathBuf> = files
                .iter()
                .filter_map(|f| {
                    let resolved = std::fs::canonicalize(&f.path).unwrap_or_else(|_| f.path.clone());
                    resolved.parent().map(|p| p.to_owned())
                })
                .collect();
            if folders.len() > 1 && item.fully_available_children_ids().contains(&child_id) {
                if self.opts.season_packs {
                    info!(
                        "fragmented season for {} (child {child_id}), searching for a season pack",
                        item.title()
                    );
                    if self.confirm()? && !self.opts.dry_run {
                        self.notifier.update(
                            &format!("[{}] Upgrading {}: {child_id}", self.opts.mode, item.title()),
                            "",
                        );
                        self.research(arr, item, child_id, false).await?;
                    }
                } else {
                    pending.push(PendingReport {
                        title: item.title().to_owned(),
                        child_id,
                        folders,
                    });
                }
            }
            return Ok(());
        }

        info!("title: {}", item.title());
        info!("movie id/season number: {child_id}");
        info!("broken items:");
        for path in &broken {
            info!("  {}", path.display());
        }
        if !self.confirm()? {
            info!("skipping");
            return Ok(());
        }
        if self.opts.dry_run {
            return Ok(());
        }

        self.notifier.update(
            &format!("[{}] Repairing {}: {child_id}", self.opts.mode, item.title()),
            "",
        );
        info!("deleting {} file(s)", files.len());
        arr.delete_files(&files).await?;
        self.research(arr, item, child_id, true).await
    }

    async fn repair_child_files(
        &self,
        arr: &ArrClient,
        item: &ManagedItem,
        child_id: i64,
    ) -> anyhow::Result<()> {
        let history = arr.get_item_history(item, Some(child_id), true).await?;
        let fully_available = item.fully_available_children_ids();
        let broken: Vec<&str> = history
            .iter()
            .filter(|h| {
                h.reason.as_deref() == Some("MissingFromDisk")
                    && h.parent_child_id
                        .is_some_and(|p| !fully_available.contains(&p))
            })
            .map(|h| h.source_title.as_str())
            .collect();

        if broken.is_empty() {
            return Ok(());
        }
        info!("title: {}", item.title());
        info!("movie id/season number: {child_id}");
        info!("missing items:");
        for title in &broken {
            info!("  {title}");
        }
        if !self.confirm()? {
            info!("skipping");
            return Ok(());
        }
        if self.opts.dry_run {
            return Ok(());
        }

        self.notifier.update(
            &format!("[{}] Repairing {}: {child_id}", self.opts.mode, item.title()),
            "",
        );
        self.research(arr, item, child_id, true).await
    }

    /// The manager side of a repair: re-fetch, toggle the child's monitored
    /// flag off and on so state is recomputed, kick off a search, confirm it
    /// asynchronously, then pace before the next repair.
    async fn research(
        &self,
        arr: &ArrClient,
        item: &ManagedItem,
        child_id: i64,
        toggle_monitoring: bool,
    ) -> anyhow::Result<()> {
        let mut item = arr.get(item.id()).await?;
        if toggle_monitoring {
            info!("re-monitoring");
            item.set_child_monitored(child_id, false);
            arr.put(&item).await?;
            item.set_child_monitored(child_id, true);
            arr.put(&item).await?;
        }

        info!("searching for new files");
        let command_id = arr.automatic_search(&item, child_id).await?;
        let arr = arr.clone();
        let title = item.title().to_owned();
        spawn_with_cancel(
            debug_span!("search_confirm", command_id),
            self.cancel.child_token(),
            async move {
                for _ in 0..SEARCH_CONFIRM_ATTEMPTS {
                    tokio::time::sleep(SEARCH_CONFIRM_INTERVAL).await;
                    let status = arr.command_status(command_id).await?;
                    match status.state {
                        CommandState::Completed => {
                            info!(
                                "search for {title} succeeded: {}",
                                status.message.as_deref().unwrap_or("no message")
                            );
                            return Ok(());
                        }
                        CommandState::Failed => {
                            warn!(
                                "search for {title} failed: {}",
                                status.message.as_deref().unwrap_or("no message")
                            );
                            return Ok(());
                        }
                        CommandState::Queued | CommandState::Running => {}
                    }
                }
                warn!("search for {title} did not finish within the confirmation window");
                Ok(())
            },
        );

        if !self.opts.repair_interval.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.opts.repair_interval) => {}
            }
        }
        Ok(())
    }

    fn symlink_broken(&self, path: &std::path::Path) -> bool {
        let Ok(target) = std::fs::read_link(path) else {
            return false;
        };
        self.debrid
            .iter()
            .any(|client| client.symlink_target_broken(path, &target))
    }

    /// Symlink mode must not run while a mount is down: every link under
    /// that mount would read as broken.
    fn mounts_unsafe(&self) -> bool {
        self.opts.mode == RepairMode::Symlink && self.debrid.iter().any(|c| !c.mount_ok())
    }

    fn confirm(&self) -> anyhow::Result<bool> {
        if self.opts.dry_run || self.opts.no_confirm {
            return Ok(true);
        }
        print!("Do you want to delete and re-grab? (y/n): ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(answer.trim().eq_ignore_ascii_case("y"))
    }
}
