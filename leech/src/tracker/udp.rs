use std::{collections::HashMap, net::{Ipv4Addr, SocketAddr}};
use bytes::{Buf, BufMut, BytesMut};
use tokio::{net::UdpSocket, time::{self, Instant}};
use url::Url;
use super::{AnnounceParams, Result, TrackerError};

// Reference: https://www.bittorrent.org/beps/bep_0015.html

const PROTOCOL_ID: i64      = 0x41727101980;
const ACTION_CONNECT: i32   = 0;
const ACTION_ANNOUNCE: i32  = 1;
const ACTION_ERROR: i32     = 3;

const CONNECT_LEN: usize = 16;
const ANNOUNCE_HEADER_LEN: usize = 20;

#[derive(Debug, PartialEq, Eq)]
pub enum Response {

    Connect { trans_id: i32, conn_id: i64 },

    Announce {
        trans_id: i32,
        interval: i32,
        leechers: i32,
        seeders: i32,
        peers: Vec<SocketAddr>,
    },

    Error { trans_id: i32, message: String },

}

impl Response {
    fn trans_id(&self) -> i32 {
        match self {
            Response::Connect { trans_id, .. }
            | Response::Announce { trans_id, .. }
            | Response::Error { trans_id, .. } => *trans_id,
        }
    }
}

pub fn connect_request(trans_id: i32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(CONNECT_LEN);
    buf.put_i64(PROTOCOL_ID);
    buf.put_i32(ACTION_CONNECT);
    buf.put_i32(trans_id);
    buf
}

pub fn announce_request(conn_id: i64, trans_id: i32, params: &AnnounceParams) -> BytesMut {
    let mut buf = BytesMut::with_capacity(98);
    buf.put_i64(conn_id);
    buf.put_i32(ACTION_ANNOUNCE);
    buf.put_i32(trans_id);
    buf.put(&params.info_hash[..]);
    buf.put(&params.client_id[..]);
    buf.put_u64(params.downloaded);
    buf.put_u64(params.left);
    buf.put_u64(params.uploaded);
    buf.put_i32(0); // Event, none.
    buf.put_i32(0); // IP address, default = 0.
    buf.put_i32(params.key);
    buf.put_i32(params.num_want.map_or(-1, |n| n as i32));
    buf.put_u16(params.port);
    buf
}

pub fn parse_response(mut buf: &[u8]) -> Result<Response> {

    if buf.len() < 8 {
        return Err(TrackerError::ResponseError("invalid response length".to_string()));
    }
    let action = buf.get_i32();
    let trans_id = buf.get_i32();

    match action {
        ACTION_CONNECT => {
            if buf.len() < 8 {
                return Err(TrackerError::ResponseError("invalid connect response length".to_string()));
            }
            Ok(Response::Connect { trans_id, conn_id: buf.get_i64() })
        },
        ACTION_ANNOUNCE => {
            if buf.len() < ANNOUNCE_HEADER_LEN - 8 {
                return Err(TrackerError::ResponseError("invalid announce response length".to_string()));
            }
            let interval = buf.get_i32();
            let leechers = buf.get_i32();
            let seeders = buf.get_i32();
            // A trailing partial entry is ignored.
            let peers = buf
                .chunks_exact(6)
                .map(|mut peer| SocketAddr::new(Ipv4Addr::from(peer.get_u32()).into(), peer.get_u16()))
                .collect();
            Ok(Response::Announce { trans_id, interval, leechers, seeders, peers })
        },
        ACTION_ERROR => Ok(Response::Error {
            trans_id,
            message: String::from_utf8_lossy(buf).into_owned(),
        }),
        action => Err(TrackerError::ResponseError(format!("unknown action {}", action))),
    }
}

// What a transaction id is waiting for, with the tracker it was sent to.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Connect(usize),
    Announce(usize),
}

/// Connects and announces to many UDP trackers over a single socket.
pub struct UdpAnnouncer {

    socket: UdpSocket,

    // Tracker urls and the address each resolved to.
    trackers: Vec<(Url, SocketAddr)>,

    pending: HashMap<i32, Pending>,

}

impl UdpAnnouncer {

    pub async fn bind() -> Result<Self> {
        // Uses first available local port.
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            trackers: Vec::new(),
            pending: HashMap::new(),
        })
    }

    // Transaction id not already in flight.
    fn new_trans_id(&self) -> i32 {
        loop {
            let id = rand::random();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    async fn send_connect(&mut self, url: &Url) -> Result<()> {
        let host = url.host_str().ok_or(TrackerError::InvalidUrl)?;
        let port = url.port().ok_or(TrackerError::InvalidUrl)?;
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .find(|addr| addr.is_ipv4())
            .ok_or(TrackerError::InvalidUrl)?;

        let trans_id = self.new_trans_id();
        self.socket.send_to(&connect_request(trans_id), addr).await?;
        tracing::debug!("sent connect request to {} ({})", url, addr);

        self.pending.insert(trans_id, Pending::Connect(self.trackers.len()));
        self.trackers.push((url.clone(), addr));
        Ok(())
    }

    /// Announces to every url and collects peers until the deadline, or
    /// until no tracker is left to answer.
    pub async fn announce_all(
        mut self,
        urls: &[Url],
        params: &AnnounceParams,
        deadline: Instant,
    ) -> Vec<SocketAddr> {

        for url in urls {
            match time::timeout_at(deadline, self.send_connect(url)).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => tracing::warn!("tracker {} skipped: {}", url, e),
                Err(_) => {
                    tracing::warn!("tracker {} skipped: timed out resolving", url);
                    break;
                },
            }
        }

        let mut peers = Vec::new();
        let mut buf = [0u8; 2048];

        while !self.pending.is_empty() {

            let (n, src) = match time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(Ok(recv)) => recv,
                Ok(Err(e)) => {
                    tracing::warn!("tracker socket error: {}", e);
                    continue;
                },
                Err(_) => {
                    tracing::info!("tracker window elapsed with {} pending", self.pending.len());
                    break;
                },
            };

            let response = match parse_response(&buf[..n]) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("bad response from {}: {}", src, e);
                    continue;
                },
            };

            let Some(pending) = self.pending.remove(&response.trans_id()) else {
                tracing::debug!("unmatched transaction id from {}", src);
                continue;
            };

            match (pending, response) {

                (Pending::Connect(idx), Response::Connect { conn_id, .. }) => {
                    let (url, addr) = self.trackers[idx].clone();
                    let trans_id = self.new_trans_id();
                    let req = announce_request(conn_id, trans_id, params);
                    match self.socket.send_to(&req, addr).await {
                        Ok(_) => {
                            tracing::debug!("sent announce request to {}", url);
                            self.pending.insert(trans_id, Pending::Announce(idx));
                        },
                        Err(e) => tracing::warn!("announce to {} failed: {}", url, e),
                    }
                },

                (Pending::Announce(idx), Response::Announce { peers: new, seeders, leechers, .. }) => {
                    tracing::info!(
                        "{} provided {} peers ({} seeders, {} leechers)",
                        self.trackers[idx].0, new.len(), seeders, leechers,
                    );
                    peers.extend(new);
                },

                (Pending::Connect(idx) | Pending::Announce(idx), Response::Error { message, .. }) => {
                    tracing::warn!("tracker {} error: {}", self.trackers[idx].0, message);
                },

                (Pending::Connect(idx) | Pending::Announce(idx), _) => {
                    tracing::warn!("unexpected response action from {}", self.trackers[idx].0);
                },
            }
        }

        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AnnounceParams {
        AnnounceParams {
            info_hash: [0x11; 20],
            client_id: [0x22; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 123_456,
            num_want: None,
            key: 0x0a0b0c0d,
        }
    }

    #[test]
    fn test_connect_request() {
        let req = connect_request(0x01020304);
        assert_eq!(req.len(), 16);
        assert_eq!(&req[..8], &[0, 0, 0x04, 0x17, 0x27, 0x10, 0x19, 0x80]);
        assert_eq!(&req[8..12], &[0, 0, 0, 0]);
        assert_eq!(&req[12..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_announce_request() {
        let req = announce_request(0x7766554433221100, 9, &params());
        assert_eq!(req.len(), 98);
        assert_eq!(&req[..8], &0x7766554433221100i64.to_be_bytes());
        assert_eq!(&req[8..12], &1i32.to_be_bytes());
        assert_eq!(&req[12..16], &9i32.to_be_bytes());
        assert_eq!(&req[16..36], &[0x11; 20]);
        assert_eq!(&req[36..56], &[0x22; 20]);
        assert_eq!(&req[56..64], &0u64.to_be_bytes());
        assert_eq!(&req[64..72], &123_456u64.to_be_bytes());
        assert_eq!(&req[72..80], &0u64.to_be_bytes());
        assert_eq!(&req[80..84], &0i32.to_be_bytes());
        assert_eq!(&req[84..88], &0i32.to_be_bytes());
        assert_eq!(&req[88..92], &0x0a0b0c0di32.to_be_bytes());
        assert_eq!(&req[92..96], &(-1i32).to_be_bytes());
        assert_eq!(&req[96..], &6881u16.to_be_bytes());
    }

    #[test]
    fn test_parse_connect_response() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&42i32.to_be_bytes());
        buf.extend_from_slice(&77i64.to_be_bytes());
        assert_eq!(parse_response(&buf).unwrap(), Response::Connect { trans_id: 42, conn_id: 77 });
        assert!(parse_response(&buf[..12]).is_err());
    }

    #[test]
    fn test_parse_announce_response() {
        let mut buf = Vec::new();
        for v in [1i32, 5, 1800, 3, 2] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1]);
        buf.extend_from_slice(&[192, 168, 1, 2, 0xc8, 0xd5]);

        let Response::Announce { trans_id, interval, peers, .. } = parse_response(&buf).unwrap() else {
            panic!("expected announce response");
        };
        assert_eq!(trans_id, 5);
        assert_eq!(interval, 1800);
        assert_eq!(peers, vec![
            SocketAddr::from(([10, 0, 0, 1], 6881)),
            SocketAddr::from(([192, 168, 1, 2], 51413)),
        ]);
    }

    #[test]
    fn test_parse_error_response() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3i32.to_be_bytes());
        buf.extend_from_slice(&8i32.to_be_bytes());
        buf.extend_from_slice(b"torrent not registered");
        assert_eq!(
            parse_response(&buf).unwrap(),
            Response::Error { trans_id: 8, message: "torrent not registered".to_string() },
        );
        assert!(parse_response(&[0, 0, 0, 1]).is_err());
    }
}
