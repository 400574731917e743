//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cache_proxy::config::ProxyConfig;
use cache_proxy::{HttpServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Canned origin answer.
///
/// Content-Length always announces the full `body`, even when `cut_after`
/// stops the transfer early.
#[derive(Clone)]
pub struct OriginReply {
    pub status: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
    /// Write the body in pieces of this size.
    pub chunk_size: Option<usize>,
    /// Pause before every piece but the first.
    pub chunk_delay: Duration,
    /// Close the connection after this many body bytes.
    pub cut_after: Option<usize>,
}

impl OriginReply {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: "200 OK",
            headers: vec![("Content-Type", content_type.to_string())],
            body: body.into(),
            chunk_size: None,
            chunk_delay: Duration::ZERO,
            cut_after: None,
        }
    }

    pub fn status(status: &'static str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "text/plain".to_string())],
            body: b"origin says no".to_vec(),
            chunk_size: None,
            chunk_delay: Duration::ZERO,
            cut_after: None,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    /// Send the body in `size`-byte pieces, `delay` apart.
    pub fn paced(mut self, size: usize, delay: Duration) -> Self {
        self.chunk_size = Some(size);
        self.chunk_delay = delay;
        self
    }

    /// Drop the connection after `bytes` body bytes.
    pub fn cut_after(mut self, bytes: usize) -> Self {
        self.cut_after = Some(bytes);
        self
    }
}

/// A programmable origin that counts the requests it receives.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    aborted: Arc<AtomicU32>,
    request_heads: Arc<Mutex<Vec<String>>>,
}

impl MockOrigin {
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Connections the peer closed while the body was still being written.
    pub fn aborted(&self) -> u32 {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Raw request heads (request line + headers) in arrival order.
    pub fn request_heads(&self) -> Vec<String> {
        self.request_heads.lock().unwrap().clone()
    }
}

/// Start an origin that answers every request with `reply`.
pub async fn start_origin(reply: OriginReply) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let aborted = Arc::new(AtomicU32::new(0));
    let request_heads = Arc::new(Mutex::new(Vec::new()));

    let origin = MockOrigin {
        addr,
        hits: hits.clone(),
        aborted: aborted.clone(),
        request_heads: request_heads.clone(),
    };

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let reply = reply.clone();
                    let hits = hits.clone();
                    let aborted = aborted.clone();
                    let request_heads = request_heads.clone();
                    tokio::spawn(async move {
                        serve_one(socket, reply, hits, aborted, request_heads).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    origin
}

async fn serve_one(
    mut socket: TcpStream,
    reply: OriginReply,
    hits: Arc<AtomicU32>,
    aborted: Arc<AtomicU32>,
    request_heads: Arc<Mutex<Vec<String>>>,
) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    hits.fetch_add(1, Ordering::SeqCst);
    request_heads
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&head).into_owned());

    let mut response = format!("HTTP/1.1 {}\r\n", reply.status);
    for (name, value) in &reply.headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        reply.body.len()
    ));

    if socket.write_all(response.as_bytes()).await.is_err() {
        aborted.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let body = match reply.cut_after {
        Some(n) => &reply.body[..n.min(reply.body.len())],
        None => &reply.body[..],
    };
    let chunk_size = reply.chunk_size.unwrap_or(body.len()).max(1);
    for (i, chunk) in body.chunks(chunk_size).enumerate() {
        if i > 0 {
            tokio::time::sleep(reply.chunk_delay).await;
        }
        if socket.write_all(chunk).await.is_err() {
            aborted.fetch_add(1, Ordering::SeqCst);
            return;
        }
    }

    // With `cut_after` this closes short of the announced Content-Length.
    let _ = socket.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Configuration suited to tests: loopback listener, temp cache dir, no
/// environment proxies.
pub fn test_config(cache_dir: &Path) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.cache.dir = cache_dir.to_path_buf();
    config.upstream.use_system_proxy = false;
    config.upstream.fetch_timeout_secs = 2;
    config
}

/// Start the proxy; returns its address and the shutdown handle.
pub async fn start_proxy(config: ProxyConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

/// Client that never decompresses and never pools.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .build()
        .unwrap()
}

/// Poll until `path` exists with content, or give up after five seconds.
pub async fn wait_for_file(path: &Path) -> Option<Vec<u8>> {
    for _ in 0..250 {
        if let Ok(data) = std::fs::read(path) {
            if !data.is_empty() {
                return Some(data);
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

/// Names of all files in `dir`, temp files included.
#[allow(dead_code)]
pub fn dir_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// Poll `check` until it holds, or give up after five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
