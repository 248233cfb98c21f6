//! Configuration parsing and management

use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::filter::builtin::NOT_WHITELISTED;
use crate::filter::matcher::TargetPattern;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Client access gate
    #[serde(default)]
    pub access: AccessConfig,

    /// Rules applied to plain HTTP requests, in order
    #[serde(default)]
    pub request_rules: Vec<RequestRule>,

    /// Rules applied to CONNECT requests, in order
    #[serde(default)]
    pub connect_rules: Vec<ConnectRule>,
}

/// Proxy-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Address to bind the proxy server
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Seconds allowed for dialing an upstream
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds a client has to send a complete request head
    #[serde(default = "default_header_read_timeout")]
    pub header_read_timeout_secs: u64,

    /// Seconds an upstream has to answer a forwarded request with a response head
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn header_read_timeout(&self) -> Duration {
        Duration::from_secs(self.header_read_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            connect_timeout_secs: default_connect_timeout(),
            header_read_timeout_secs: default_header_read_timeout(),
            upstream_timeout_secs: default_upstream_timeout(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_header_read_timeout() -> u64 {
    30
}

fn default_upstream_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,

    /// Whether to log allowed requests and opened tunnels
    pub log_allowed_requests: bool,

    /// Whether to log blocked requests and refused tunnels
    pub log_blocked_requests: bool,

    /// JSONL file receiving one line per decision
    pub audit_log: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_allowed_requests: true,
            log_blocked_requests: true,
            audit_log: None,
        }
    }
}

/// Helper for deserializing `log_requests` as either a bool or a table.
#[derive(Deserialize)]
#[serde(untagged)]
enum LogRequestsValue {
    Bool(bool),
    Table {
        #[serde(default = "default_true")]
        allowed: bool,
        #[serde(default = "default_true")]
        blocked: bool,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct LoggingConfigRaw {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default)]
    log_requests: Option<LogRequestsValue>,
    #[serde(default)]
    audit_log: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl<'de> Deserialize<'de> for LoggingConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = LoggingConfigRaw::deserialize(deserializer)?;
        let (log_allowed, log_blocked) = match raw.log_requests {
            None => (true, true),
            Some(LogRequestsValue::Bool(b)) => (b, b),
            Some(LogRequestsValue::Table { allowed, blocked }) => (allowed, blocked),
        };
        Ok(LoggingConfig {
            level: raw.level,
            log_allowed_requests: log_allowed,
            log_blocked_requests: log_blocked,
            audit_log: raw.audit_log,
        })
    }
}

/// Client IP whitelist settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Exact client IPs admitted. `None` admits everyone.
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,

    /// Take the client IP from the first `X-Forwarded-For` hop when present
    #[serde(default = "default_true")]
    pub trust_forwarded_for: bool,

    /// Gate CONNECT tunnels with the whitelist as well
    #[serde(default = "default_true")]
    pub apply_to_connect: bool,

    #[serde(default = "default_access_message")]
    pub message: String,

    #[serde(default = "default_status")]
    pub status: u16,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            whitelist: None,
            trust_forwarded_for: true,
            apply_to_connect: true,
            message: default_access_message(),
            status: default_status(),
        }
    }
}

fn default_access_message() -> String {
    NOT_WHITELISTED.to_string()
}

fn default_status() -> u16 {
    403
}

fn default_blocked_message() -> String {
    "Blocked by proxy policy.".to_string()
}

/// A rule in the plain HTTP chain
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestRule {
    /// Overwrite a header on every request
    SetHeader { name: String, value: String },

    /// Add a header value, keeping any the client sent
    AppendHeader { name: String, value: String },

    /// Strip a header from every request
    RemoveHeader { name: String },

    /// Refuse requests for a host while the local hour is in `[start_hour, end_hour]`.
    /// A `host` containing `*` is matched as a glob (`*.reddit.com`).
    BlockHours {
        host: String,
        start_hour: u8,
        end_hour: u8,
        #[serde(default = "default_blocked_message")]
        message: String,
        #[serde(default = "default_status")]
        status: u16,
    },
}

/// A rule in the CONNECT chain
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectRule {
    /// Refuse tunnels whose `host:port` target matches `pattern`
    RejectTarget {
        pattern: String,
        /// Treat `pattern` as a regular expression instead of a glob
        #[serde(default)]
        regex: bool,
        #[serde(default = "default_blocked_message")]
        message: String,
        #[serde(default = "default_status")]
        status: u16,
    },
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.proxy.connect_timeout_secs == 0 {
            return Err(Error::config("proxy: connect_timeout_secs must be positive"));
        }
        if self.proxy.header_read_timeout_secs == 0 {
            return Err(Error::config(
                "proxy: header_read_timeout_secs must be positive",
            ));
        }
        if self.proxy.upstream_timeout_secs == 0 {
            return Err(Error::config("proxy: upstream_timeout_secs must be positive"));
        }

        Self::validate_access(&self.access)?;

        for (i, rule) in self.request_rules.iter().enumerate() {
            Self::validate_request_rule(rule)
                .map_err(|msg| Error::config(format!("request_rules #{}: {}", i + 1, msg)))?;
        }
        for (i, rule) in self.connect_rules.iter().enumerate() {
            Self::validate_connect_rule(rule)
                .map_err(|msg| Error::config(format!("connect_rules #{}: {}", i + 1, msg)))?;
        }

        Ok(())
    }

    fn validate_access(access: &AccessConfig) -> Result<()> {
        let ctx = |msg: String| Error::config(format!("access: {}", msg));

        check_status(access.status).map_err(ctx)?;
        if let Some(ref ips) = access.whitelist {
            for (i, ip) in ips.iter().enumerate() {
                if ip.trim().is_empty() {
                    return Err(ctx(format!("whitelist entry #{} is empty", i + 1)));
                }
            }
        }
        Ok(())
    }

    fn validate_request_rule(rule: &RequestRule) -> std::result::Result<(), String> {
        match rule {
            RequestRule::SetHeader { name, value } | RequestRule::AppendHeader { name, value } => {
                check_header_name(name)?;
                if HeaderValue::from_str(value).is_err() {
                    return Err(format!("invalid value for header {:?}", name));
                }
            }
            RequestRule::RemoveHeader { name } => check_header_name(name)?,
            RequestRule::BlockHours {
                host,
                start_hour,
                end_hour,
                status,
                ..
            } => {
                if host.is_empty() {
                    return Err("`host` must not be empty".to_string());
                }
                for (field, hour) in [("start_hour", start_hour), ("end_hour", end_hour)] {
                    if *hour > 23 {
                        return Err(format!("`{}` must be 0-23, got {}", field, hour));
                    }
                }
                check_status(*status)?;
            }
        }
        Ok(())
    }

    fn validate_connect_rule(rule: &ConnectRule) -> std::result::Result<(), String> {
        match rule {
            ConnectRule::RejectTarget {
                pattern,
                regex,
                status,
                ..
            } => {
                if pattern.is_empty() {
                    return Err("`pattern` must not be empty".to_string());
                }
                if *regex {
                    TargetPattern::regex(pattern).map_err(|e| e.to_string())?;
                }
                check_status(*status)?;
            }
        }
        Ok(())
    }

    /// Create a minimal configuration: no rules, everyone admitted
    pub fn minimal(bind_address: impl Into<String>) -> Self {
        Self {
            proxy: ProxyConfig {
                bind_address: bind_address.into(),
                ..ProxyConfig::default()
            },
            ..Self::default()
        }
    }
}

fn check_header_name(name: &str) -> std::result::Result<(), String> {
    HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|_| format!("invalid header name {:?}", name))
}

fn check_status(status: u16) -> std::result::Result<(), String> {
    StatusCode::from_u16(status)
        .map(|_| ())
        .map_err(|_| format!("invalid status code {}", status))
}
