//! Turnstile - an intercepting HTTP/HTTPS forward proxy
//!
//! Clients send absolute-form HTTP requests and `CONNECT` requests to the
//! proxy. Each request runs through an ordered rule chain before anything is
//! dialed: plain HTTP requests may have their headers rewritten or be refused
//! with a synthesized response, and CONNECT requests are either refused or
//! turned into an opaque byte tunnel.
//!
//! # Features
//!
//! - **Client whitelist**: exact-match IPs, resolved from the first
//!   `X-Forwarded-For` hop or the peer address
//! - **Header rewriting**: set or remove request headers before forwarding
//! - **Time windows**: refuse a host during configured local hours
//! - **CONNECT target patterns**: refuse tunnels by glob or regex on `host:port`
//! - **Audit log**: one JSON line per decision
//!
//! # Example
//!
//! ```no_run
//! use turnstile::{Config, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml")?;
//!     let server = ProxyServer::new(config)?;
//!     let (_tx, rx) = tokio::sync::oneshot::channel();
//!     server.run_until_shutdown(rx).await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod filter;
pub mod proxy;
#[doc(hidden)]
pub mod test_support;

pub use audit::AuditLogger;
pub use config::Config;
pub use error::{Error, Result};
pub use filter::{Clock, FixedClock, Policy, SystemClock};
pub use proxy::ProxyServer;
