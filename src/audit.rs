//! Structured JSONL audit logging for request and tunnel decisions.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;

use crate::filter::RequestContext;

/// Event type for an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    RequestAllowed,
    RequestBlocked,
    TunnelOpened,
    TunnelBlocked,
    UpstreamFailed,
}

/// Decision outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Allowed,
    Blocked,
}

impl AuditEvent {
    pub fn decision(self) -> AuditDecision {
        match self {
            AuditEvent::RequestBlocked | AuditEvent::TunnelBlocked => AuditDecision::Blocked,
            // The policy allowed it; the upstream just wasn't there.
            AuditEvent::RequestAllowed | AuditEvent::TunnelOpened | AuditEvent::UpstreamFailed => {
                AuditDecision::Allowed
            }
        }
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub event: AuditEvent,
    pub method: String,
    pub url: String,
    pub host: String,
    pub client_ip: String,
    pub decision: AuditDecision,
    /// Rule that decided; absent when the chain ran out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    /// Entry for `ctx`, timestamped now
    pub fn new(event: AuditEvent, ctx: &RequestContext) -> Self {
        Self {
            timestamp: now_rfc3339(),
            event,
            method: ctx.method().to_string(),
            url: ctx.url(),
            host: ctx.target().host.clone(),
            client_ip: ctx.client_ip().to_string(),
            decision: event.decision(),
            rule: None,
            status: None,
            error: None,
        }
    }

    pub fn with_rule(mut self, rule: Option<&str>) -> Self {
        self.rule = rule.map(str::to_string);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Returns the current UTC time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Audit logger that writes JSONL entries to a file.
///
/// Uses `std::fs::File` with a `std::sync::Mutex` since writes are small
/// and fast.
pub struct AuditLogger {
    writer: std::sync::Mutex<std::io::BufWriter<std::fs::File>>,
}

impl AuditLogger {
    /// Open (or create) the audit log file in append mode.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: std::sync::Mutex::new(std::io::BufWriter::new(file)),
        })
    }

    /// Write an audit entry as a JSON line. Errors are logged but never propagated.
    pub fn log(&self, entry: &AuditEntry) {
        use std::io::Write;
        let json = match serde_json::to_string(entry) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit entry");
                return;
            }
        };

        let mut writer = match self.writer.lock() {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "Failed to lock audit log writer");
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{}", json) {
            tracing::error!(error = %e, "Failed to write audit entry");
            return;
        }
        if let Err(e) = writer.flush() {
            tracing::error!(error = %e, "Failed to flush audit log");
        }
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}
