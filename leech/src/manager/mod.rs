use std::{path::PathBuf, sync::{Arc, atomic::{AtomicBool, Ordering}}};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::{
    config::Config,
    fs::{DiskError, OutputFiles},
    metainfo::TorrentMetadata,
    p2p::PeerSession,
    picker::PieceTracker,
    stats::{DownloadSnapshot, Stats, Status},
    store::StoreInfo,
    tracker::{self, AnnounceParams},
    ID,
};


type Result<T, E = DownloadError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {

    #[error("failed to prepare output files: {0}")]
    Disk(#[from] DiskError),

    #[error("download task panicked")]
    DownloadPanic,

}

/// State shared by every peer session of one download.
#[derive(Debug)]
pub struct DownloadContext {

    pub info_hash: ID,

    pub config: Config,

    pub picker: Arc<PieceTracker>,

    pub files: Arc<OutputFiles>,

    pub stats: Arc<Stats>,

    // Cancelled on completion and on shutdown.
    pub cancel: CancellationToken,

    completed: AtomicBool,

}

impl DownloadContext {

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // Only the first caller closes the files, later calls do nothing.
    pub fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("download complete");
        if let Err(e) = self.files.close_all() {
            tracing::error!("failed to close files: {}", e);
        }
        self.stats.set_status(Status::Complete);
        self.cancel.cancel();
    }
}

pub struct DownloadManager {

    metadata: TorrentMetadata,

    store: StoreInfo,

    config: Config,

    stats: Arc<Stats>,

    cancel: CancellationToken,

}

impl DownloadManager {

    #[tracing::instrument(name = "download", skip_all, fields(name = %self.metadata.name))]
    pub async fn run(self) -> Result<()> {

        tracing::info!("starting download of {:?}", self.metadata);
        let files = Arc::new(OutputFiles::new(self.store.clone())?);
        let picker = Arc::new(PieceTracker::from_store(&self.store));
        tracing::debug!("{} blocks in {} pieces", picker.total(), picker.num_pieces());

        let ctx = Arc::new(DownloadContext {
            info_hash: self.metadata.info_hash,
            config: self.config.clone(),
            picker,
            files,
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
            completed: AtomicBool::new(false),
        });

        // Nothing to fetch.
        if ctx.picker.is_done() {
            ctx.complete();
            return Ok(());
        }

        let params = AnnounceParams::new(
            self.metadata.info_hash,
            self.store.total_len,
            &self.config,
        );
        let peers = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            peers = tracker::get_peers(&self.metadata.announce, params, &self.config) => peers,
        };

        if peers.is_empty() {
            tracing::warn!("no peers found");
            self.stats.set_status(Status::NoPeers);
            return Ok(());
        }
        tracing::info!("got {} peers", peers.len());
        self.stats.set_peers(&peers);
        self.stats.set_status(Status::Connecting);

        let sessions: Vec<_> = peers
            .into_iter()
            .map(|address| tokio::spawn(PeerSession::new(address, Arc::clone(&ctx)).run()))
            .collect();

        for session in sessions {
            if let Err(e) = session.await {
                tracing::error!("peer session join error: {}", e);
            }
        }

        if !ctx.picker.is_done() {
            tracing::warn!("all peer sessions ended before the download finished");
        }
        ctx.files.close_all()?;
        Ok(())
    }
}

/// Starts downloading in the background, returns immediately.
///
/// Must be called from within a tokio runtime.
pub fn start_download(metadata: TorrentMetadata, save_path: impl Into<PathBuf>, config: Config) -> Handle {

    let store = StoreInfo::new(&metadata, save_path.into());
    let stats = Arc::new(Stats::new(&metadata.name, &store.files));
    let cancel = CancellationToken::new();

    let manager = DownloadManager {
        metadata,
        store,
        config,
        stats: Arc::clone(&stats),
        cancel: cancel.clone(),
    };
    let handle = tokio::spawn(async move {
        if let Err(e) = manager.run().await {
            tracing::error!("download error: {}", e);
        }
    });

    Handle { stats, cancel, handle }
}

// Handle returned to the user to observe and stop a download.
pub struct Handle {

    stats: Arc<Stats>,

    cancel: CancellationToken,

    handle: JoinHandle<()>,

}

impl Handle {

    pub fn snapshot(&self) -> DownloadSnapshot {
        self.stats.snapshot()
    }

    pub fn status(&self) -> Status {
        self.stats.status()
    }

    // Whether the download task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops every peer session and waits for the download task to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.handle.await.map_err(|_| DownloadError::DownloadPanic)
    }
}
