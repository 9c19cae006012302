use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use bytes::Buf;
use url::Url;
use serde::de;
use serde_derive::Deserialize;
use super::{AnnounceParams, Result, TrackerError};

pub struct HttpTracker {

    client: reqwest::Client,

    url: Url,

}

impl HttpTracker {

    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    fn announce_url(&self, params: &AnnounceParams) -> String {
        let mut url = format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&key={}&compact=1",
            self.url.as_str(),
            if self.url.query().is_some() { "&" } else { "?" },
            urlencoding::encode_binary(&params.info_hash),
            urlencoding::encode_binary(&params.client_id),
            params.port,
            params.uploaded,
            params.downloaded,
            params.left,
            params.key as u32,
        );
        if let Some(num_peers) = params.num_want {
            url.push_str(&format!("&numwant={}", num_peers));
        }
        url
    }

    pub async fn announce(&self, params: &AnnounceParams) -> Result<Vec<SocketAddr>> {

        let url = self.announce_url(params);
        tracing::debug!("announce url: {}", url);

        let raw_resp = self.client
            .get(url)
            .send()
            .await?
            .bytes()
            .await?;

        let resp: HttpResponse = serde_bencode::from_bytes(&raw_resp)?;
        tracing::debug!("announce response: {:?}", resp);

        if let Some(failure) = resp.failure_reason {
            return Err(TrackerError::ResponseError(failure));
        }
        if let Some(warning) = resp.warning_message {
            tracing::warn!("warning: {}", warning);
        }

        tracing::info!(
            "{} provided {} peers ({} seeders, {} leechers)",
            self.url,
            resp.peers.len(),
            resp.complete.unwrap_or(0),
            resp.incomplete.unwrap_or(0),
        );
        // Announces are one-shot, the intervals are only reported.
        tracing::debug!("interval {:?}, min interval {:?}", resp.interval, resp.min_interval);
        Ok(resp.peers)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct HttpResponse {

    // If present, then no other keys may be present.
    #[serde(rename = "failure reason")]
    pub failure_reason: Option<String>,

    // Like failure reason, but the response is still processed.
    #[serde(rename = "warning message")]
    pub warning_message: Option<String>,

    // Seconds the client should wait between regular announces.
    pub interval: Option<u64>,

    #[serde(rename = "min interval")]
    pub min_interval: Option<u64>,

    // Number of seeders.
    pub complete: Option<u64>,

    // Number of leechers.
    pub incomplete: Option<u64>,

    #[serde(default)]
    #[serde(deserialize_with = "peer_deserialize")]
    pub peers: Vec<SocketAddr>,
}

// The tracker can either return a dictionary model or a compacted string.
// Even when a compacted string is requested, the tracker may still return dictionaries.
fn peer_deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct PeerVisitor;

    impl<'de> de::Visitor<'de> for PeerVisitor {

        type Value = Vec<SocketAddr>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string of bytes or a list of dictionaries")
        }

        // 4 byte IPv4 address and 2 byte port per peer, big endian.
        fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.len() % 6 != 0 {
                return Err(E::custom("peer string not multiple of 6"));
            }

            Ok(v.chunks_exact(6)
                .map(|mut peer| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(peer.get_u32())), peer.get_u16()))
                .collect())
        }

        // List of dictionaries with "ip" and "port" keys.
        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            #[derive(Deserialize)]
            struct PeerItem {
                ip: String,
                port: u16,
            }

            let mut peers = Vec::new();
            while let Some(peer) = seq.next_element::<PeerItem>()? {
                match peer.ip.parse::<IpAddr>() {
                    Ok(ip) => peers.push(SocketAddr::new(ip, peer.port)),
                    // Hostnames aren't resolved.
                    Err(_) => tracing::debug!("skipping peer with ip {:?}", peer.ip),
                }
            }

            Ok(peers)
        }
    }

    deserializer.deserialize_any(PeerVisitor)
}
