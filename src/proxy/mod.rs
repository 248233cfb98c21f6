//! HTTP proxy server implementation

mod handler;
pub mod response;
mod server;
mod tunnel;
pub mod upstream;

pub use handler::ProxyHandler;
pub use server::ProxyServer;
pub use tunnel::Tunnel;
pub use upstream::{DialFuture, Dialer, TcpDialer};
