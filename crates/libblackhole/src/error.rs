/// Terminal outcomes of one per-backend ingest run.
///
/// The distinction that matters to the caller is [`IngestError::fails_grab`]:
/// grab-level failures make the content manager re-search for an alternative
/// release, local problems (a full disk, a dead mount during symlinking) must
/// not — the grab itself was fine.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Rejected(&'static str),
    #[error("torrent timed out in state {0}")]
    Timeout(&'static str),
    #[error("torrent folder not found in filesystem")]
    MountNotFound,
    #[error("error materializing symlinks: {0:#}")]
    Materialize(#[source] anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    pub fn fails_grab(&self) -> bool {
        matches!(
            self,
            IngestError::Rejected(_) | IngestError::Timeout(_) | IngestError::MountNotFound
        )
    }
}
