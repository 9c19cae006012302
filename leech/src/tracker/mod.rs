use std::{collections::HashSet, net::SocketAddr};
use tokio::time::{self, Instant};
use tracing::Instrument;
use url::Url;
use crate::{config::Config, ID};

mod http;
mod udp;
#[cfg(test)]
pub(crate) mod tests;

pub use udp::UdpAnnouncer;
pub use http::HttpTracker;

type Result<T> = std::result::Result<T, TrackerError>;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("error deserializing response: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("invalid url")]
    InvalidUrl,

    #[error("response error: {0}")]
    ResponseError(String),

}

#[derive(Debug, Copy, Clone, Default)]
pub struct AnnounceParams {

    // Hash of info dict.
    pub info_hash:  ID,

    // Unique ID for the client.
    pub client_id:  ID,

    // Port we claim to listen on.
    pub port:       u16,

    pub uploaded:   u64,

    pub downloaded: u64,

    // Bytes still needed to complete the download.
    pub left:       u64,

    // Number of peers wanted, None lets the tracker decide.
    pub num_want:   Option<usize>,

    // Random value identifying this client to trackers.
    pub key:        i32,

}

impl AnnounceParams {
    pub fn new(info_hash: ID, left: u64, config: &Config) -> Self {
        Self {
            info_hash,
            client_id: config.client_id,
            port: config.listen_port,
            left,
            key: rand::random(),
            ..Default::default()
        }
    }
}

/// Announces to every tracker and gathers the peers they return.
///
/// Resolves when every tracker has answered or failed, or when the
/// configured window elapses, whichever comes first. Peers are returned
/// once each, in the order they were first seen.
pub async fn get_peers(urls: &[Url], params: AnnounceParams, config: &Config) -> Vec<SocketAddr> {

    let deadline = Instant::now() + config.tracker_timeout;

    let mut udp_urls = Vec::new();
    let mut http_urls = Vec::new();
    for url in urls {
        match url.scheme() {
            "udp" => udp_urls.push(url.clone()),
            "http" | "https" if config.http_trackers => http_urls.push(url.clone()),
            scheme => tracing::warn!("unsupported tracker scheme: {}", scheme),
        }
    }

    let udp = async {
        if udp_urls.is_empty() {
            return Vec::new();
        }
        match UdpAnnouncer::bind().await {
            Ok(announcer) => announcer.announce_all(&udp_urls, &params, deadline).await,
            Err(e) => {
                tracing::error!("failed to bind tracker socket: {}", e);
                Vec::new()
            },
        }
    };

    let http = futures::future::join_all(http_urls.into_iter().map(|url| {
        let span = tracing::info_span!("tracker", url = %url);
        async move {
            let tracker = HttpTracker::new(url);
            match time::timeout_at(deadline, tracker.announce(&params)).await {
                Ok(Ok(peers)) => peers,
                Ok(Err(e)) => {
                    tracing::warn!("announce failed: {}", e);
                    Vec::new()
                },
                Err(_) => {
                    tracing::warn!("announce timed out");
                    Vec::new()
                },
            }
        }.instrument(span)
    }));

    let (udp_peers, http_peers) = tokio::join!(udp, http);

    let mut seen = HashSet::new();
    udp_peers
        .into_iter()
        .chain(http_peers.into_iter().flatten())
        .filter(|peer| seen.insert(*peer))
        .collect()
}
