//! Per-request state passed through the rule chain

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::Authority;
use hyper::{Method, Uri};
use std::fmt;

use super::client_ip::{self, ForwardedForTrust};
use crate::error::{Error, Result};

/// Where a request is headed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Dialable host; IPv6 literals are stored without brackets
    pub host: String,
    pub port: u16,
    /// Authority text exactly as the client sent it
    pub authority: String,
}

impl Target {
    /// Target of an absolute-form plain HTTP request (`GET http://host/path`).
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(Error::malformed(format!("unsupported scheme '{}'", other)));
            }
            None => {
                return Err(Error::malformed(format!(
                    "request target '{}' is not in absolute form",
                    uri
                )));
            }
        }
        let authority = uri
            .authority()
            .ok_or_else(|| Error::malformed(format!("no host in '{}'", uri)))?;
        Self::from_authority(authority, 80)
    }

    /// Target of a CONNECT request (`CONNECT host:port`).
    pub fn from_connect(uri: &Uri) -> Result<Self> {
        let authority = uri
            .authority()
            .ok_or_else(|| Error::malformed(format!("CONNECT target '{}' has no authority", uri)))?;
        Self::from_authority(authority, 443)
    }

    fn from_authority(authority: &Authority, default_port: u16) -> Result<Self> {
        let host = authority.host();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(Error::malformed("empty host"));
        }
        Ok(Self {
            host: host.to_string(),
            port: authority.port_u16().unwrap_or(default_port),
            authority: authority.as_str().to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A header change requested by a rule and applied by the chain evaluator
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderOp {
    /// Replace every value of the header with this one
    Set(HeaderName, HeaderValue),
    /// Add a value, keeping existing ones
    Append(HeaderName, HeaderValue),
    Remove(HeaderName),
}

impl HeaderOp {
    pub fn apply(&self, headers: &mut HeaderMap) {
        match self {
            HeaderOp::Set(name, value) => {
                headers.insert(name.clone(), value.clone());
            }
            HeaderOp::Append(name, value) => {
                headers.append(name.clone(), value.clone());
            }
            HeaderOp::Remove(name) => {
                headers.remove(name);
            }
        }
    }
}

/// Everything the rules may inspect about one request.
///
/// Owned by the connection task that parsed the request. Rules get a shared
/// reference; only the chain evaluator changes headers, and only through
/// [`HeaderOp`]s.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    target: Target,
    path: String,
    headers: HeaderMap,
    remote_addr: String,
    forwarded_for: Option<String>,
    client_ip: String,
}

impl RequestContext {
    pub fn new(
        method: Method,
        target: Target,
        path: impl Into<String>,
        headers: HeaderMap,
        remote_addr: impl Into<String>,
        trust: ForwardedForTrust,
    ) -> Self {
        let remote_addr = remote_addr.into();
        let forwarded_for = client_ip::forwarded_for(&headers);
        let client_ip = client_ip::resolve(forwarded_for.as_deref(), &remote_addr, trust);
        Self {
            method,
            target,
            path: path.into(),
            headers,
            remote_addr,
            forwarded_for,
            client_ip,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Path and query of a plain HTTP request; empty for CONNECT
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn forwarded_for(&self) -> Option<&str> {
        self.forwarded_for.as_deref()
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// Target as it appears in logs: `host:port` for tunnels, a URL otherwise
    pub fn url(&self) -> String {
        if self.is_connect() {
            self.target.authority.clone()
        } else {
            format!("http://{}{}", self.target.authority, self.path)
        }
    }

    pub(crate) fn apply(&mut self, ops: &[HeaderOp]) {
        for op in ops {
            op.apply(&mut self.headers);
        }
    }

    /// Give up the context, keeping the (possibly rewritten) headers for forwarding.
    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }
}
