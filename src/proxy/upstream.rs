//! Upstream dialing and plain HTTP forwarding

use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::filter::Target;

pub type DialFuture<'a> = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send + 'a>>;

/// Opens TCP connections to upstream servers.
///
/// Called only after the relevant chain has allowed the request.
pub trait Dialer: Send + Sync + Debug {
    fn dial<'a>(&'a self, host: &'a str, port: u16) -> DialFuture<'a>;
}

/// Dials with `TcpStream::connect` under a timeout
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
    host_override: Option<String>,
    port_override: Option<u16>,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            host_override: None,
            port_override: None,
        }
    }

    /// Connect here instead of the requested host (for testing with
    /// non-resolvable hostnames). Rules still see the requested host.
    pub fn with_host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    /// Connect to this port instead of the requested one (for testing).
    pub fn with_port_override(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }
}

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, host: &'a str, port: u16) -> DialFuture<'a> {
        Box::pin(async move {
            let host = self.host_override.as_deref().unwrap_or(host);
            let port = self.port_override.unwrap_or(port);
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await
            {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {}:{} timed out", host, port),
                )),
            }
        })
    }
}

/// Hop-by-hop headers that must not be forwarded (RFC 7230 §6.1).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Drop hop-by-hop headers, including any the client named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Rebuild an absolute-form proxy request as an origin-form request for `target`.
///
/// `Host` is set from the request target.
pub fn origin_request<B>(
    method: Method,
    path: &str,
    mut headers: HeaderMap,
    target: &Target,
    body: B,
) -> Result<Request<B>> {
    strip_hop_by_hop(&mut headers);
    let host = HeaderValue::from_str(&target.authority)
        .map_err(|_| Error::malformed(format!("invalid host '{}'", target.authority)))?;
    headers.insert(HOST, host);

    let path = if path.is_empty() { "/" } else { path };
    let uri: hyper::Uri = path
        .parse()
        .map_err(|e| Error::malformed(format!("invalid path '{}': {}", path, e)))?;

    let mut req = Request::new(body);
    *req.method_mut() = method;
    *req.uri_mut() = uri;
    *req.headers_mut() = headers;
    Ok(req)
}

/// Send `req` over an already dialed connection and return the response.
pub async fn send_request<B>(stream: TcpStream, req: Request<B>) -> Result<Response<hyper::body::Incoming>>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            let err_str = e.to_string();
            if !err_str.contains("connection closed") && !err_str.contains("early eof") {
                tracing::debug!(error = %e, "HTTP upstream connection error");
            }
        }
    });

    Ok(sender.send_request(req).await?)
}
