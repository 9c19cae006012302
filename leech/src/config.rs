use std::time::Duration;
use rand::Rng;
use crate::ID;

#[derive(Debug, Clone)]
pub struct Config {

    // Our peer id, sent in handshakes and announces.
    pub client_id: ID,

    // Port reported to trackers, we never accept connections on it.
    pub listen_port: u16,

    // Window in which tracker responses are collected.
    pub tracker_timeout: Duration,

    // Bound on connecting to a peer, and on silence from a connected peer.
    pub connect_timeout: Duration,

    // Wait before reconnecting to a peer after a failure.
    pub reconnect_delay: Duration,

    // None retries a peer forever.
    pub max_reconnects: Option<u32>,

    // Announce to http(s) trackers as well as udp ones.
    pub http_trackers: bool,

}

const CLIENT_ID_PREFIX: &[u8; 8] = b"-LE0001-";

// Azureus style id, fixed client prefix followed by random bytes.
pub fn generate_client_id() -> ID {
    let mut id = [0; 20];
    id[..8].copy_from_slice(CLIENT_ID_PREFIX);
    rand::thread_rng().fill(&mut id[8..]);
    id
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            listen_port: 6881,
            tracker_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_reconnects: None,
            http_trackers: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert_eq!(&a[..8], b"-LE0001-");
        assert_ne!(a, b);
    }
}
