use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError},
};
use serde_derive::Serialize;
use crate::store::FileInfo;

// Number of speed samples kept in the snapshot.
pub const SPEED_WINDOW: usize = 60;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    #[default]
    #[serde(rename = "Initializing")]
    Initializing,
    #[serde(rename = "Connecting to peers")]
    Connecting,
    #[serde(rename = "No peers found")]
    NoPeers,
    #[serde(rename = "Downloading")]
    Downloading,
    #[serde(rename = "Complete")]
    Complete,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Initializing => write!(f, "Initializing"),
            Status::Connecting => write!(f, "Connecting to peers"),
            Status::NoPeers => write!(f, "No peers found"),
            Status::Downloading => write!(f, "Downloading"),
            Status::Complete => write!(f, "Complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {

    pub path: String,

    pub downloaded: u64,

    pub total: u64,

}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedSample {

    // Unix time in milliseconds.
    pub timestamp_ms: i64,

    // Kilobytes received in this sample.
    pub kb: f64,

}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {

    pub ip: IpAddr,

    pub port: u16,

    pub connected: bool,

}

impl PeerRecord {
    fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// State of a download as seen by anything polling it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadSnapshot {

    pub name: String,

    pub status: Status,

    pub files: Vec<FileStats>,

    pub total_size: u64,

    pub downloaded: u64,

    // Always zero, nothing is seeded.
    pub uploaded: u64,

    pub remaining: u64,

    // Percentage of blocks received.
    pub progress: f64,

    pub speeds: VecDeque<SpeedSample>,

    pub peers: Vec<PeerRecord>,

    pub total_peers: usize,

    pub connected_peers: usize,

}

/// Shared, lock protected snapshot that sessions update in place.
///
/// Writers only hold the lock for in memory updates, so readers never wait
/// on network or disk I/O.
#[derive(Debug, Default)]
pub struct Stats {
    inner: RwLock<DownloadSnapshot>,
}

impl Stats {

    pub fn new(name: &str, files: &[FileInfo]) -> Self {
        let total_size = files.iter().map(|f| f.length).sum();
        Self {
            inner: RwLock::new(DownloadSnapshot {
                name: name.to_string(),
                files: files
                    .iter()
                    .map(|f| FileStats {
                        path: f.path.display().to_string(),
                        downloaded: 0,
                        total: f.length,
                    })
                    .collect(),
                total_size,
                remaining: total_size,
                ..Default::default()
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DownloadSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DownloadSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        self.read().clone()
    }

    pub fn status(&self) -> Status {
        self.read().status
    }

    // Complete is final.
    pub fn set_status(&self, status: Status) {
        let mut snapshot = self.write();
        if snapshot.status != Status::Complete {
            snapshot.status = status;
        }
    }

    pub fn set_peers(&self, peers: &[SocketAddr]) {
        let mut snapshot = self.write();
        snapshot.peers = peers
            .iter()
            .map(|addr| PeerRecord { ip: addr.ip(), port: addr.port(), connected: false })
            .collect();
        snapshot.total_peers = snapshot.peers.len();
        snapshot.connected_peers = 0;
    }

    pub fn set_connected(&self, address: SocketAddr, connected: bool) {
        let mut snapshot = self.write();
        if let Some(peer) = snapshot.peers.iter_mut().find(|p| p.address() == address) {
            peer.connected = connected;
        }
        snapshot.connected_peers = snapshot.peers.iter().filter(|p| p.connected).count();
    }

    pub fn remove_peer(&self, address: SocketAddr) {
        let mut snapshot = self.write();
        snapshot.peers.retain(|p| p.address() != address);
        snapshot.total_peers = snapshot.peers.len();
        snapshot.connected_peers = snapshot.peers.iter().filter(|p| p.connected).count();
    }

    /// Accounts for a newly received block.
    ///
    /// `file_bytes` holds how many of the block's bytes landed in each file,
    /// `progress` is the fraction of blocks received.
    pub fn record_block(&self, len: usize, file_bytes: &[(usize, u64)], progress: f64) {
        let sample = SpeedSample {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            kb: len as f64 / 1024.0,
        };

        let mut snapshot = self.write();
        snapshot.downloaded += len as u64;
        snapshot.remaining = snapshot.total_size.saturating_sub(snapshot.downloaded);
        for (file_idx, bytes) in file_bytes {
            if let Some(file) = snapshot.files.get_mut(*file_idx) {
                file.downloaded += bytes;
            }
        }
        snapshot.progress = progress * 100.0;
        if snapshot.status != Status::Complete {
            snapshot.status = Status::Downloading;
        }

        snapshot.speeds.push_back(sample);
        while snapshot.speeds.len() > SPEED_WINDOW {
            snapshot.speeds.pop_front();
        }
    }
}
