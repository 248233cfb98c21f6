//! Main proxy server

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use super::handler::ProxyHandler;
use super::upstream::{Dialer, TcpDialer};
use crate::audit::AuditLogger;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{Clock, Policy, SystemClock};

/// The main proxy server
pub struct ProxyServer {
    config: Config,
    policy: Arc<Policy>,
    dialer: Arc<dyn Dialer>,
    audit_logger: Option<Arc<AuditLogger>>,
    listener: Option<TcpListener>,
}

impl ProxyServer {
    /// Create a new proxy server from configuration, reading the system clock
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a proxy server whose time-of-day rules read `clock`
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let policy = Arc::new(Policy::from_config(&config, clock)?);

        let audit_logger = match config.logging.audit_log {
            Some(ref path) => {
                let logger = AuditLogger::open(path).map_err(|e| {
                    Error::config(format!(
                        "Failed to open audit log '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Some(Arc::new(logger))
            }
            None => None,
        };

        tracing::info!(
            whitelist = config.access.whitelist.as_ref().map(|w| w.len()),
            request_rules = policy.requests().chain().rule_count(),
            connect_rules = policy.connects().chain().rule_count(),
            "Policy compiled"
        );

        let dialer = Arc::new(TcpDialer::new(config.proxy.connect_timeout()));
        Ok(Self::with_components(config, policy, dialer).with_audit_logger_opt(audit_logger))
    }

    /// Create a server with an existing policy and dialer
    pub fn with_components(config: Config, policy: Arc<Policy>, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config,
            policy,
            dialer,
            audit_logger: None,
            listener: None,
        }
    }

    /// Replace the upstream dialer.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Send every upstream connection to `host:port` instead of the
    /// requested target (for testing). Rules still see the requested target.
    pub fn with_upstream_override(mut self, host: impl Into<String>, port: u16) -> Self {
        self.dialer = Arc::new(
            TcpDialer::new(self.config.proxy.connect_timeout())
                .with_host_override(host)
                .with_port_override(port),
        );
        self
    }

    /// Set the audit logger for structured request logging.
    pub fn with_audit_logger(self, logger: Arc<AuditLogger>) -> Self {
        self.with_audit_logger_opt(Some(logger))
    }

    fn with_audit_logger_opt(mut self, logger: Option<Arc<AuditLogger>>) -> Self {
        self.audit_logger = logger;
        self
    }

    /// Run the proxy server with graceful shutdown
    pub async fn run_until_shutdown(
        mut self,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        let local_addr = self.bind().await?;
        tracing::info!(address = %local_addr, "Proxy server listening");
        self.serve(shutdown).await
    }

    /// Bind the server to its configured address and return the local address.
    ///
    /// Binding to port 0 picks a free port. Call `serve()` afterwards to start
    /// accepting connections.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_address = &self.config.proxy.bind_address;
        let addr: SocketAddr = bind_address.parse().map_err(|e| {
            Error::config(format!("Invalid bind address '{}': {}", bind_address, e))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::proxy(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::proxy(format!("Failed to get local address: {}", e)))?;

        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Serve connections using a previously bound listener, with graceful shutdown.
    pub async fn serve(mut self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::proxy("serve() called before bind()"))?;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    return Ok(());
                }
                result = listener.accept() => {
                    let (stream, client_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    tracing::debug!(client = %client_addr, "New connection");
                    self.spawn_connection(stream, client_addr);
                }
            }
        }
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        let handler = ProxyHandler::new(
            self.policy.clone(),
            self.dialer.clone(),
            client_addr.to_string(),
        )
        .with_request_logging(
            self.config.logging.log_allowed_requests,
            self.config.logging.log_blocked_requests,
        )
        .with_audit_logger(self.audit_logger.clone())
        .with_upstream_timeout(self.config.proxy.upstream_timeout());
        let header_read_timeout = self.header_read_timeout();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { handler.handle(req).await }
            });

            if let Err(e) = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(header_read_timeout)
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                if !e.to_string().contains("connection closed") {
                    tracing::debug!(client = %client_addr, error = %e, "Connection error");
                }
            }
        });
    }

    fn header_read_timeout(&self) -> Duration {
        self.config.proxy.header_read_timeout()
    }

    /// Get the bind address
    pub fn bind_address(&self) -> &str {
        &self.config.proxy.bind_address
    }

    /// Get the compiled policy
    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }
}
