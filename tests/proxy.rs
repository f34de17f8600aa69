//! End-to-end tests: a client, the proxy and a fake upstream, all over loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rcproxy::{CacheStore, HttpClient, ProxyHandler, Request, Response, Server, StatusCode, Upstream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A `Content-Disposition` value carrying a Latin-1 `é`.
const LATIN1_DISPOSITION: &[u8] = b"attachment; filename=\"caf\xe9.txt\"";

/// A raw HTTP response split into its parts.
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Starts a fake upstream that answers `/get` with the query echoed as JSON,
/// `/missing` with a 404, `/file` with a Latin-1 header, and counts every
/// request it sees.
async fn spawn_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();

    let counter = Arc::clone(&hits);
    tokio::spawn(server.run(move |req: Request| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            match req.path() {
                "/get" => {
                    let (key, value) = req
                        .query_string()
                        .and_then(|q| q.split_once('='))
                        .unwrap_or(("", ""));
                    Response::new(StatusCode::OK)
                        .header("Content-Type", "application/json")
                        .header("X-Upstream", "fake")
                        .body(format!("{{\"{key}\":{value}}}"))
                }
                "/missing" => Response::new(StatusCode::NOT_FOUND).body("nope"),
                "/file" => Response::new(StatusCode::OK)
                    .header("Content-Disposition", LATIN1_DISPOSITION)
                    .header("Content-Type", "application/octet-stream")
                    .body("data"),
                _ => Response::new(StatusCode::OK).body(req.target()),
            }
        }
    }));

    (addr, hits)
}

/// Starts a proxy in front of `upstream` sharing `cache`.
async fn spawn_proxy(upstream: &str, cache: Arc<CacheStore>) -> SocketAddr {
    let upstream = Upstream::parse(upstream).unwrap();
    let proxy = Arc::new(ProxyHandler::new(upstream, HttpClient::new(), cache));
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();

    tokio::spawn(server.run(move |req: Request| {
        let proxy = Arc::clone(&proxy);
        async move { proxy.handle(req).await }
    }));

    addr
}

/// A port nothing is listening on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn exchange(proxy: SocketAddr, method: &str, target: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request =
        format!("{method} {target} HTTP/1.1\r\nHost: proxy\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    raw
}

async fn get(proxy: SocketAddr, target: &str) -> Reply {
    parse_reply(&exchange(proxy, "GET", target).await)
}

async fn head(proxy: SocketAddr, target: &str) -> Reply {
    parse_reply(&exchange(proxy, "HEAD", target).await)
}

fn parse_reply(raw: &[u8]) -> Reply {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head terminator");
    let head = std::str::from_utf8(&raw[..split]).unwrap();
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap();
    let status = status_line.split(' ').nth(1).unwrap().parse().unwrap();
    let headers = lines
        .map(|line| {
            let (name, value) = line.split_once(':').unwrap();
            (name.trim().to_owned(), value.trim().to_owned())
        })
        .collect();

    Reply {
        status,
        headers,
        body: raw[split + 4..].to_vec(),
    }
}

#[tokio::test]
async fn miss_then_hit_serves_cached_body() {
    let (upstream, hits) = spawn_upstream().await;
    let cache = Arc::new(CacheStore::new());
    let proxy = spawn_proxy(&format!("http://{upstream}"), Arc::clone(&cache)).await;

    let first = get(proxy, "/get?x=1").await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("Content-Type"), Some("application/json"));
    assert_eq!(first.header("X-Upstream"), Some("fake"));
    let json: serde_json::Value = serde_json::from_slice(&first.body).unwrap();
    assert_eq!(json, serde_json::json!({"x": 1}));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(cache.lookup("/get?x=1").as_deref(), Some(&first.body[..]));

    // Served from memory: same bytes, default headers, upstream untouched.
    let second = get(proxy, "/get?x=1").await;
    assert_eq!(second.status, 200);
    assert_eq!(second.body, first.body);
    assert_eq!(second.header("Content-Type"), Some("text/plain; charset=utf-8"));
    assert_eq!(second.header("X-Upstream"), None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_queries_are_distinct_entries() {
    let (upstream, hits) = spawn_upstream().await;
    let cache = Arc::new(CacheStore::new());
    let proxy = spawn_proxy(&format!("http://{upstream}"), Arc::clone(&cache)).await;

    let one = get(proxy, "/get?x=1").await;
    let two = get(proxy, "/get?x=2").await;
    assert_ne!(one.body, two.body);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn upstream_error_status_is_relayed_and_cached() {
    let (upstream, hits) = spawn_upstream().await;
    let cache = Arc::new(CacheStore::new());
    let proxy = spawn_proxy(&format!("http://{upstream}"), Arc::clone(&cache)).await;

    let first = get(proxy, "/missing").await;
    assert_eq!(first.status, 404);
    assert_eq!(first.body, b"nope");

    let second = get(proxy, "/missing").await;
    assert_eq!(second.status, 200);
    assert_eq!(second.body, b"nope");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway_and_isolated() {
    let (upstream, _hits) = spawn_upstream().await;
    let dead = closed_port().await;

    let cache = Arc::new(CacheStore::new());
    cache.store("/get?x=9", bytes::Bytes::from_static(b"kept"));

    let healthy = spawn_proxy(&format!("http://{upstream}"), Arc::clone(&cache)).await;
    let broken = spawn_proxy(&format!("http://{dead}"), Arc::clone(&cache)).await;

    let (failed, served) = tokio::join!(get(broken, "/get?x=2"), get(healthy, "/get?x=1"));

    assert_eq!(failed.status, 502);
    assert_eq!(served.status, 200);
    assert_eq!(cache.lookup("/get?x=2"), None);
    assert_eq!(cache.lookup("/get?x=9").as_deref(), Some(&b"kept"[..]));

    // The broken proxy still answers hits from the shared store.
    let hit = get(broken, "/get?x=9").await;
    assert_eq!(hit.status, 200);
    assert_eq!(hit.body, b"kept");
}

#[tokio::test]
async fn head_is_answered_without_body_on_miss_and_hit() {
    let (upstream, hits) = spawn_upstream().await;
    let cache = Arc::new(CacheStore::new());
    let proxy = spawn_proxy(&format!("http://{upstream}"), Arc::clone(&cache)).await;

    // Miss: the upstream's length is relayed, nothing is cached.
    let miss = head(proxy, "/get?x=7").await;
    assert_eq!(miss.status, 200);
    assert_eq!(miss.header("Content-Type"), Some("application/json"));
    assert_eq!(miss.header("Content-Length"), Some("7"));
    assert!(miss.body.is_empty());
    assert_eq!(cache.lookup("/get?x=7"), None);

    let full = get(proxy, "/get?x=7").await;
    assert_eq!(full.body, br#"{"x":7}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Hit: the cached length is declared, the bytes are not sent.
    let hit = head(proxy, "/get?x=7").await;
    assert_eq!(hit.status, 200);
    assert_eq!(hit.header("Content-Length"), Some("7"));
    assert!(hit.body.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_utf8_header_is_relayed_verbatim() {
    let (upstream, _hits) = spawn_upstream().await;
    let proxy = spawn_proxy(&format!("http://{upstream}"), Arc::new(CacheStore::new())).await;

    let raw = exchange(proxy, "GET", "/file").await;

    let line = [&b"Content-Disposition: "[..], LATIN1_DISPOSITION, &b"\r\n"[..]].concat();
    assert!(raw.windows(line.len()).any(|w| w == line.as_slice()));
    assert!(raw.ends_with(b"\r\n\r\ndata"));
}
