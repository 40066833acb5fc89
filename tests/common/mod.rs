//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use api_gateway::config::{GatewayConfig, StoreKind};
use api_gateway::lifecycle::Shutdown;
use api_gateway::GatewayServer;

pub const SECRET: &str = "integration-secret";

/// Request head as received by a mock backend.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub target: String,
    pub head: String,
}

impl ReceivedRequest {
    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

async fn read_head(socket: &mut TcpStream) -> Option<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf).to_string();
    let mut request_line = head.lines().next()?.split(' ');
    Some(ReceivedRequest {
        method: request_line.next()?.to_string(),
        target: request_line.next()?.to_string(),
        head,
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        401 => "401 Unauthorized",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(ReceivedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_head(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend answering `status`/`body`, counting the requests it sees.
pub async fn start_counting_backend(status: u16, body: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let addr = start_programmable_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { (status, body.to_string()) }
    })
    .await;
    (addr, hits)
}

/// Write `raw` to `addr` and read the reply until the peer closes.
pub async fn send_raw(addr: SocketAddr, raw: &str) -> String {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Status code from a raw HTTP/1.1 response.
pub fn raw_status(response: &str) -> u16 {
    response
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Default deployment routed at local backends, in-memory counters.
pub fn config(auth: SocketAddr, data: SocketAddr, process: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.store.kind = StoreKind::Memory;
    config.auth.secret = SECRET.into();
    for service in &mut config.services {
        let addr = match service.name.as_str() {
            "auth-service" => auth,
            "go-api" => data,
            _ => process,
        };
        service.endpoints = vec![format!("http://{}", addr)];
    }
    config
}

pub struct RunningGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl RunningGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the gateway on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> RunningGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config).unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    let handle = tokio::spawn(async move { server.run(listener, server_shutdown).await });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    RunningGateway {
        addr,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Mint a token the auth service would issue.
pub fn token(secret: &str, user_id: i64, ttl_secs: i64) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
    let claims = serde_json::json!({
        "user_id": user_id,
        "email": format!("user{}@example.com", user_id),
        "iat": now,
        "exp": now + ttl_secs,
    });
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
