//! Per-request proxy handler

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::sync::Arc;
use std::time::Duration;

use super::response::{
    closing, gateway_error, rejection_response, tunnel_established, ProxyBody,
};
use super::tunnel::Tunnel;
use super::upstream::{origin_request, send_request, Dialer};
use crate::audit::{AuditEntry, AuditEvent, AuditLogger};
use crate::error::{Error, Result};
use crate::filter::{Interception, Policy, RequestContext, Target};

/// Handles requests arriving on one client connection
#[derive(Clone)]
pub struct ProxyHandler {
    policy: Arc<Policy>,
    dialer: Arc<dyn Dialer>,
    remote_addr: String,
    audit_logger: Option<Arc<AuditLogger>>,
    log_allowed_requests: bool,
    log_blocked_requests: bool,
    upstream_timeout: Duration,
}

impl ProxyHandler {
    pub fn new(policy: Arc<Policy>, dialer: Arc<dyn Dialer>, remote_addr: impl Into<String>) -> Self {
        Self {
            policy,
            dialer,
            remote_addr: remote_addr.into(),
            audit_logger: None,
            log_allowed_requests: true,
            log_blocked_requests: true,
            upstream_timeout: Duration::from_secs(30),
        }
    }

    /// Bound the wait for an upstream response head
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_request_logging(mut self, log_allowed: bool, log_blocked: bool) -> Self {
        self.log_allowed_requests = log_allowed;
        self.log_blocked_requests = log_blocked;
        self
    }

    pub fn with_audit_logger(mut self, logger: Option<Arc<AuditLogger>>) -> Self {
        self.audit_logger = logger;
        self
    }

    fn emit_audit(&self, entry: AuditEntry) {
        if let Some(ref logger) = self.audit_logger {
            logger.log(&entry);
        }
    }

    /// Handle an incoming proxy request.
    ///
    /// An `Err` means the request was malformed; hyper then closes the
    /// connection without a response.
    pub async fn handle(self, req: Request<Incoming>) -> Result<Response<ProxyBody>> {
        let result = if req.method() == Method::CONNECT {
            self.handle_connect(req).await
        } else {
            self.handle_http(req).await
        };
        if let Err(ref e) = result {
            tracing::debug!(client = %self.remote_addr, error = %e, "Dropping connection");
        }
        result
    }

    async fn handle_http(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>> {
        let (parts, body) = req.into_parts();
        let target = Target::from_uri(&parts.uri)?;
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        let ctx = RequestContext::new(
            parts.method,
            target,
            path,
            parts.headers,
            self.remote_addr.as_str(),
            self.policy.trust(),
        );

        match self.policy.requests().intercept(ctx) {
            Interception::Respond {
                ctx,
                rejection,
                rule,
            } => {
                if self.log_blocked_requests {
                    tracing::warn!(
                        method = %ctx.method(),
                        url = %ctx.url(),
                        client_ip = %ctx.client_ip(),
                        rule = rule.as_deref().unwrap_or("-"),
                        status = rejection.status.as_u16(),
                        "BLOCKED (HTTP)"
                    );
                }
                self.emit_audit(
                    AuditEntry::new(AuditEvent::RequestBlocked, &ctx)
                        .with_rule(rule.as_deref())
                        .with_status(rejection.status.as_u16()),
                );
                Ok(rejection_response(&rejection))
            }
            Interception::Forward { ctx, rule } => {
                if self.log_allowed_requests {
                    tracing::info!(
                        method = %ctx.method(),
                        url = %ctx.url(),
                        client_ip = %ctx.client_ip(),
                        "ALLOWED (HTTP)"
                    );
                }
                Ok(self.forward(ctx, rule, body).await)
            }
        }
    }

    async fn forward(
        &self,
        ctx: RequestContext,
        rule: Option<String>,
        body: Incoming,
    ) -> Response<ProxyBody> {
        let audit = AuditEntry::new(AuditEvent::RequestAllowed, &ctx).with_rule(rule.as_deref());
        let target = ctx.target().clone();

        let result = async {
            let stream = self
                .dialer
                .dial(&target.host, target.port)
                .await
                .map_err(|e| Error::upstream(target.to_string(), e))?;
            let method = ctx.method().clone();
            let path = ctx.path().to_string();
            let req = origin_request(method, &path, ctx.into_headers(), &target, body)?;
            match tokio::time::timeout(self.upstream_timeout, send_request(stream, req)).await {
                Ok(resp) => resp,
                Err(_) => Err(Error::upstream(
                    target.to_string(),
                    format!("no response within {}s", self.upstream_timeout.as_secs()),
                )),
            }
        }
        .await;

        match result {
            Ok(resp) => {
                self.emit_audit(audit.with_status(resp.status().as_u16()));
                resp.map(|b| b.boxed())
            }
            Err(e) => {
                tracing::error!(upstream = %target, error = %e, "HTTP forwarding error");
                let mut entry = audit.with_status(502).with_error(&e);
                entry.event = AuditEvent::UpstreamFailed;
                self.emit_audit(entry);
                gateway_error(&e.to_string())
            }
        }
    }

    async fn handle_connect(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>> {
        let target = Target::from_connect(req.uri())?;
        let ctx = RequestContext::new(
            Method::CONNECT,
            target,
            "",
            req.headers().clone(),
            self.remote_addr.as_str(),
            self.policy.trust(),
        );

        tracing::debug!(upstream = %ctx.target(), "CONNECT request");

        let (ctx, rule) = match self.policy.connects().intercept(ctx) {
            Interception::Respond {
                ctx,
                rejection,
                rule,
            } => {
                if self.log_blocked_requests {
                    tracing::warn!(
                        upstream = %ctx.target().authority,
                        client_ip = %ctx.client_ip(),
                        rule = rule.as_deref().unwrap_or("-"),
                        "BLOCKED (CONNECT)"
                    );
                }
                self.emit_audit(
                    AuditEntry::new(AuditEvent::TunnelBlocked, &ctx)
                        .with_rule(rule.as_deref())
                        .with_status(rejection.status.as_u16()),
                );
                return Ok(closing(rejection_response(&rejection)));
            }
            Interception::Forward { ctx, rule } => (ctx, rule),
        };

        // Dial before answering so an unreachable upstream still gets a 502
        let target = ctx.target();
        let upstream = match self.dialer.dial(&target.host, target.port).await {
            Ok(stream) => stream,
            Err(e) => {
                let e = Error::upstream(target.to_string(), e);
                tracing::warn!(upstream = %target, error = %e, "CONNECT upstream unreachable");
                self.emit_audit(
                    AuditEntry::new(AuditEvent::UpstreamFailed, &ctx)
                        .with_rule(rule.as_deref())
                        .with_status(502)
                        .with_error(&e),
                );
                return Ok(closing(gateway_error(&e.to_string())));
            }
        };

        if self.log_allowed_requests {
            tracing::info!(
                upstream = %target.authority,
                client_ip = %ctx.client_ip(),
                "TUNNEL (CONNECT)"
            );
        }
        self.emit_audit(
            AuditEntry::new(AuditEvent::TunnelOpened, &ctx)
                .with_rule(rule.as_deref())
                .with_status(200),
        );

        Tunnel::new(target.authority.clone(), upstream).spawn(hyper::upgrade::on(req));
        Ok(tunnel_established())
    }
}
