use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, atomic::{AtomicUsize, Ordering}},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, UdpSocket},
    task::JoinHandle,
    time::Instant,
};
use url::Url;
use crate::config::Config;
use super::*;

fn config(window: Duration) -> Config {
    Config { tracker_timeout: window, ..Default::default() }
}

fn params() -> AnnounceParams {
    AnnounceParams::new([0x33; 20], 1000, &Config::default())
}

fn peer(last: u8, port: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], port))
}

pub(crate) struct MockTracker {
    pub(crate) url: Url,
    // Announces carrying a connection id this tracker never handed out.
    pub(crate) foreign_announces: Arc<AtomicUsize>,
    _handle: JoinHandle<()>,
}

// Answers connects with conn_id, and announces carrying conn_id with peers.
pub(crate) async fn spawn_udp_tracker(conn_id: i64, peers: Vec<SocketAddr>) -> MockTracker {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let url = Url::parse(&format!("udp://{}:{}/announce", addr.ip(), addr.port())).unwrap();
    let foreign_announces = Arc::new(AtomicUsize::new(0));
    let foreign = foreign_announces.clone();

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let (len, src) = socket.recv_from(&mut buf).await.unwrap();
            if len < 16 {
                continue;
            }
            let action = i32::from_be_bytes(buf[8..12].try_into().unwrap());
            let tx_id = i32::from_be_bytes(buf[12..16].try_into().unwrap());

            if action == 0 {
                assert_eq!(len, 16);
                assert_eq!(i64::from_be_bytes(buf[0..8].try_into().unwrap()), 0x41727101980);
                let mut resp = Vec::with_capacity(16);
                resp.extend_from_slice(&0i32.to_be_bytes());
                resp.extend_from_slice(&tx_id.to_be_bytes());
                resp.extend_from_slice(&conn_id.to_be_bytes());
                socket.send_to(&resp, src).await.unwrap();
            } else if action == 1 {
                assert_eq!(len, 98);
                if i64::from_be_bytes(buf[0..8].try_into().unwrap()) != conn_id {
                    foreign.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                let mut resp = Vec::new();
                for v in [1i32, tx_id, 1800, 1, peers.len() as i32] {
                    resp.extend_from_slice(&v.to_be_bytes());
                }
                for peer in peers.iter() {
                    let SocketAddr::V4(v4) = peer else { continue };
                    resp.extend_from_slice(&v4.ip().octets());
                    resp.extend_from_slice(&v4.port().to_be_bytes());
                }
                socket.send_to(&resp, src).await.unwrap();
            }
        }
    });

    MockTracker { url, foreign_announces, _handle: handle }
}

// Receives everything and never answers.
pub(crate) async fn spawn_silent_tracker() -> (Url, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let url = Url::parse(&format!("udp://{}:{}", addr.ip(), addr.port())).unwrap();
    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while socket.recv_from(&mut buf).await.is_ok() {}
    });
    (url, handle)
}

// Serves one HTTP announce with a compact peer list.
async fn spawn_http_tracker(peers: Vec<SocketAddr>) -> (Url, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("http://{}/announce", addr)).unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let mut compact = Vec::new();
        for peer in peers.iter() {
            let SocketAddr::V4(v4) = peer else { continue };
            compact.extend_from_slice(&v4.ip().octets());
            compact.extend_from_slice(&v4.port().to_be_bytes());
        }
        let mut body = format!("d8:intervali1800e5:peers{}:", compact.len()).into_bytes();
        body.extend_from_slice(&compact);
        body.push(b'e');

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len(),
        );
        stream.write_all(header.as_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();
        stream.shutdown().await.ok();

        String::from_utf8_lossy(&request).into_owned()
    });

    (url, handle)
}

#[tokio::test]
async fn test_single_udp_tracker() {
    let tracker = spawn_udp_tracker(7, vec![peer(1, 6881), peer(2, 51413)]).await;
    let start = Instant::now();
    let peers = get_peers(&[tracker.url.clone()], params(), &config(Duration::from_secs(10))).await;
    assert_eq!(peers, vec![peer(1, 6881), peer(2, 51413)]);
    // Returns as soon as the only tracker has answered.
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_announce_goes_to_answering_tracker() {
    let a = spawn_udp_tracker(0x0a, vec![peer(1, 1000)]).await;
    let b = spawn_udp_tracker(0x0b, vec![peer(2, 2000)]).await;

    let urls = [a.url.clone(), b.url.clone()];
    let peers = get_peers(&urls, params(), &config(Duration::from_secs(10))).await;

    let peers: HashSet<_> = peers.into_iter().collect();
    assert_eq!(peers, HashSet::from([peer(1, 1000), peer(2, 2000)]));
    assert_eq!(a.foreign_announces.load(Ordering::SeqCst), 0);
    assert_eq!(b.foreign_announces.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_silent_tracker_bounded_by_window() {
    let good = spawn_udp_tracker(1, vec![peer(1, 1000)]).await;
    let (silent, _handle) = spawn_silent_tracker().await;

    let window = Duration::from_millis(400);
    let start = Instant::now();
    let peers = get_peers(&[silent, good.url.clone()], params(), &config(window)).await;

    assert_eq!(peers, vec![peer(1, 1000)]);
    assert!(start.elapsed() >= window);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_no_peers_when_nothing_answers() {
    let (silent, _handle) = spawn_silent_tracker().await;
    let peers = get_peers(&[silent], params(), &config(Duration::from_millis(200))).await;
    assert!(peers.is_empty());
}

#[tokio::test]
async fn test_peers_deduplicated() {
    let a = spawn_udp_tracker(1, vec![peer(1, 1000), peer(2, 2000)]).await;
    let b = spawn_udp_tracker(2, vec![peer(2, 2000), peer(3, 3000), peer(1, 1000)]).await;

    let peers = get_peers(&[a.url.clone(), b.url.clone()], params(), &config(Duration::from_secs(10))).await;
    assert_eq!(peers.len(), 3);
    let unique: HashSet<_> = peers.iter().collect();
    assert_eq!(unique.len(), 3);
}

#[tokio::test]
async fn test_bad_urls_skipped() {
    let urls = [
        Url::parse("wss://tracker.example/announce").unwrap(),
        Url::parse("udp://127.0.0.1/no-port").unwrap(),
    ];
    let start = Instant::now();
    let peers = get_peers(&urls, params(), &config(Duration::from_secs(10))).await;
    assert!(peers.is_empty());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_http_and_udp_trackers() {
    let udp = spawn_udp_tracker(5, vec![peer(1, 1000)]).await;
    let (http, request) = spawn_http_tracker(vec![peer(1, 1000), peer(4, 4000)]).await;

    let peers = get_peers(&[udp.url.clone(), http], params(), &config(Duration::from_secs(10))).await;
    let peers: HashSet<_> = peers.into_iter().collect();
    assert_eq!(peers, HashSet::from([peer(1, 1000), peer(4, 4000)]));

    let request = request.await.unwrap();
    assert!(request.starts_with("GET /announce?info_hash="));
    assert!(request.contains("&left=1000&"));
    assert!(request.contains("&compact=1"));
}

#[tokio::test]
async fn test_http_trackers_disabled() {
    let (http, _request) = spawn_http_tracker(vec![peer(4, 4000)]).await;
    let config = Config { http_trackers: false, ..config(Duration::from_secs(10)) };
    let peers = get_peers(&[http], params(), &config).await;
    assert!(peers.is_empty());
}
