//! Client IP resolution from `X-Forwarded-For` and the peer address

use hyper::header::HeaderMap;
use std::net::{IpAddr, SocketAddr};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// How much the proxy believes the `X-Forwarded-For` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedForTrust {
    /// Use the first hop the client claims, falling back to the peer address.
    FirstHop,
    /// Ignore the header; always use the peer address.
    Ignore,
}

/// Raw value of the first `X-Forwarded-For` header, if it is readable text.
pub fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// First hop of an `X-Forwarded-For` value, or None when empty or malformed.
pub fn first_hop(forwarded_for: &str) -> Option<&str> {
    let first = forwarded_for.split(',').next()?.trim();
    if first.is_empty() || first.parse::<IpAddr>().is_err() {
        return None;
    }
    Some(first)
}

/// IP part of a `host:port` peer address, or the empty string if it does not parse.
pub fn peer_ip(remote_addr: &str) -> String {
    remote_addr
        .parse::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}

/// Resolve the client IP used for access decisions.
///
/// An empty result matches no whitelist entry, so an unidentifiable client
/// is refused.
pub fn resolve(forwarded_for: Option<&str>, remote_addr: &str, trust: ForwardedForTrust) -> String {
    if trust == ForwardedForTrust::FirstHop {
        if let Some(hop) = forwarded_for.and_then(first_hop) {
            return hop.to_string();
        }
    }
    peer_ip(remote_addr)
}
