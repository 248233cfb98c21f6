//! Opaque CONNECT tunnels

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Result;

/// Relays bytes between an upgraded client connection and its upstream.
///
/// Bytes are never inspected. The relay ends as soon as either side reaches
/// EOF or fails; the other side's write half is shut down and both sockets
/// are dropped, so a departed client never pins its upstream.
#[derive(Debug)]
pub struct Tunnel {
    target: String,
    upstream: TcpStream,
}

impl Tunnel {
    pub fn new(target: impl Into<String>, upstream: TcpStream) -> Self {
        Self {
            target: target.into(),
            upstream,
        }
    }

    /// Start the relay once hyper hands over the connection.
    ///
    /// Runs on its own task; the 200 response must be returned to hyper
    /// before the upgrade can complete.
    pub fn spawn(self, upgrade: OnUpgrade) {
        tokio::spawn(async move {
            let target = self.target.clone();
            let upgraded = match upgrade.await {
                Ok(u) => u,
                Err(e) => {
                    tracing::debug!(upstream = %target, error = %e, "CONNECT upgrade failed");
                    return;
                }
            };

            match self.relay(TokioIo::new(upgraded)).await {
                Ok((sent, received)) => {
                    tracing::debug!(upstream = %target, sent, received, "Tunnel closed");
                }
                Err(e) => {
                    let err_str = e.to_string();
                    if !err_str.contains("connection reset") && !err_str.contains("broken pipe") {
                        tracing::debug!(upstream = %target, error = %e, "Tunnel error");
                    }
                }
            }
        });
    }

    /// Copy in both directions until either side is done.
    /// Returns (client to upstream, upstream to client) byte counts.
    pub async fn relay<C>(self, client: C) -> Result<(u64, u64)>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut upstream_read, mut upstream_write) = self.upstream.into_split();
        let mut sent = 0u64;
        let mut received = 0u64;

        let finished = tokio::select! {
            r = pipe(&mut client_read, &mut upstream_write, &mut sent) => r.map(|_| "client"),
            r = pipe(&mut upstream_read, &mut client_write, &mut received) => r.map(|_| "upstream"),
        };
        let side = finished?;
        tracing::trace!(upstream = %self.target, side, "Tunnel side reached EOF");
        Ok((sent, received))
    }
}

/// Copy until EOF on `reader`, then shut down `writer`.
async fn pipe<R, W>(reader: &mut R, writer: &mut W, count: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *count += n as u64;
    }
}
