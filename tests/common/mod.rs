//! Test infrastructure for end-to-end proxy tests.
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use turnstile::proxy::{DialFuture, Dialer, TcpDialer};
use turnstile::{Clock, Config, FixedClock, ProxyServer, SystemClock};

pub const REFERENCE_POLICY: &str = r#"
[access]
whitelist = ["10.52.0.121", "10.52.198.146"]

[[request_rules]]
kind = "set_header"
name = "X-GoProxy"
value = "Powered-by-Goproxy"

[[request_rules]]
kind = "block_hours"
host = "www.reddit.com"
start_hour = 8
end_hour = 17
message = "Access to Reddit is blocked during work hours."

[[connect_rules]]
kind = "reject_target"
pattern = "*.gif:443"
"#;

/// `X-Forwarded-For` value that the reference whitelist admits
pub const LISTED_IP: &str = "10.52.0.121";

// ---------------------------------------------------------------------------
// CountingDialer
// ---------------------------------------------------------------------------

/// Dialer that records every dial and sends all of them to one address.
#[derive(Debug)]
pub struct CountingDialer {
    inner: TcpDialer,
    dials: Mutex<Vec<String>>,
}

impl CountingDialer {
    /// Route every dial to `upstream`. `None` leaves targets untouched.
    pub fn new(upstream: Option<SocketAddr>) -> Self {
        let mut inner = TcpDialer::new(Duration::from_secs(5));
        if let Some(addr) = upstream {
            inner = inner
                .with_host_override(addr.ip().to_string())
                .with_port_override(addr.port());
        }
        Self {
            inner,
            dials: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    /// Requested `host:port` of each dial, in order
    pub fn targets(&self) -> Vec<String> {
        self.dials.lock().unwrap().clone()
    }
}

impl Dialer for CountingDialer {
    fn dial<'a>(&'a self, host: &'a str, port: u16) -> DialFuture<'a> {
        self.dials.lock().unwrap().push(format!("{}:{}", host, port));
        self.inner.dial(host, port)
    }
}

// ---------------------------------------------------------------------------
// TestProxy
// ---------------------------------------------------------------------------

pub struct TestProxy {
    pub addr: SocketAddr,
    pub dialer: Arc<CountingDialer>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

pub struct TestProxyBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    upstream: Option<SocketAddr>,
}

impl TestProxy {
    pub fn builder() -> TestProxyBuilder {
        let mut config = Config::minimal("127.0.0.1:0");
        config.logging.log_allowed_requests = false;
        config.logging.log_blocked_requests = false;
        TestProxyBuilder {
            config,
            clock: Arc::new(SystemClock),
            upstream: None,
        }
    }

    /// Proxy running the reference policy at `hour`, dialing `upstream` for everything.
    pub async fn reference(hour: u8, upstream: SocketAddr) -> Self {
        Self::builder()
            .toml(REFERENCE_POLICY)
            .hour(hour)
            .upstream(upstream)
            .start()
            .await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl TestProxyBuilder {
    /// Replace the policy sections with those in `toml`; proxy and logging
    /// settings stay test defaults.
    pub fn toml(mut self, toml: &str) -> Self {
        let parsed = Config::parse(toml).unwrap();
        self.config.access = parsed.access;
        self.config.request_rules = parsed.request_rules;
        self.config.connect_rules = parsed.connect_rules;
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn hour(mut self, hour: u8) -> Self {
        self.clock = Arc::new(FixedClock(hour));
        self
    }

    pub fn upstream(mut self, addr: SocketAddr) -> Self {
        self.upstream = Some(addr);
        self
    }

    pub fn audit_log(mut self, path: &Path) -> Self {
        self.config.logging.audit_log = Some(path.to_path_buf());
        self
    }

    pub async fn start(self) -> TestProxy {
        let dialer = Arc::new(CountingDialer::new(self.upstream));
        let mut server = ProxyServer::with_clock(self.config, self.clock)
            .unwrap()
            .with_dialer(dialer.clone());

        let addr = server.bind().await.unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = server.serve(shutdown_rx).await;
        });

        TestProxy {
            addr,
            dialer,
            shutdown_tx,
        }
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

/// reqwest client that sends every request through the proxy.
pub fn test_client(proxy_addr: SocketAddr) -> reqwest::Client {
    let proxy = reqwest::Proxy::all(format!("http://{}", proxy_addr)).unwrap();
    reqwest::Client::builder()
        .proxy(proxy)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Write `request` verbatim and read until the proxy closes the connection.
pub async fn raw_exchange(proxy_addr: SocketAddr, request: &str) -> io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(proxy_addr).await?;
    stream.write_all(request.as_bytes()).await?;
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "proxy kept connection open"))??;
    Ok(buf)
}

/// Send `CONNECT target` and return the stream with the response head.
pub async fn open_connect(
    proxy_addr: SocketAddr,
    target: &str,
    extra_headers: &[(&str, &str)],
) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", target, target);
    for (name, value) in extra_headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let head = read_head(&mut stream).await;
    (stream, head)
}

/// Read a response head byte by byte so nothing after it is consumed.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("timed out reading response head")
            .unwrap();
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).to_string()
}

/// True once the peer has closed `stream`
pub async fn closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut rest = Vec::new();
    matches!(
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await,
        Ok(Ok(_))
    )
}

// ---------------------------------------------------------------------------
// Upstreams
// ---------------------------------------------------------------------------

/// TCP server that echoes each connection's bytes back.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = sock.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// Accepts connections and holds them open without ever writing
pub async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });
    addr
}

/// An address nothing listens on
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ---------------------------------------------------------------------------
// Audit log and log capture
// ---------------------------------------------------------------------------

pub fn read_audit_entries(path: &Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[derive(Clone)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Captures tracing output on the current thread while alive.
///
/// Use with the default current-thread `#[tokio::test]` runtime so the
/// proxy's tasks log on the capturing thread.
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn new() -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let writer = CaptureWriter(buf.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_target(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self { buf, _guard: guard }
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).to_string()
    }
}
