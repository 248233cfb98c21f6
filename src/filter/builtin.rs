//! Built-in rules

use hyper::header::{HeaderName, HeaderValue};
use std::collections::HashSet;
use std::sync::Arc;

use super::clock::Clock;
use super::context::{HeaderOp, RequestContext};
use super::matcher::TargetPattern;
use super::rules::{Rejection, Rule, Verdict};

pub const NOT_WHITELISTED: &str = "Your IP is not whitelisted.";

/// Refuses clients whose resolved IP is not listed.
///
/// Membership is an exact string comparison; no CIDR ranges and no address
/// normalization.
#[derive(Debug, Clone)]
pub struct WhitelistRule {
    allowed: Arc<HashSet<String>>,
    rejection: Rejection,
}

impl WhitelistRule {
    pub fn new(allowed: Arc<HashSet<String>>) -> Self {
        Self::with_rejection(allowed, Rejection::forbidden(NOT_WHITELISTED))
    }

    pub fn with_rejection(allowed: Arc<HashSet<String>>, rejection: Rejection) -> Self {
        Self { allowed, rejection }
    }

    /// An empty IP (unidentifiable client) is never a member.
    pub fn contains(&self, ip: &str) -> bool {
        !ip.is_empty() && self.allowed.contains(ip)
    }
}

impl Rule for WhitelistRule {
    fn name(&self) -> &str {
        "whitelist"
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        if self.contains(ctx.client_ip()) {
            Verdict::Continue
        } else {
            Verdict::Reject(self.rejection.clone())
        }
    }

    fn is_access_gate(&self) -> bool {
        true
    }
}

/// Overwrites one header on every request
#[derive(Debug, Clone)]
pub struct SetHeaderRule {
    name: HeaderName,
    value: HeaderValue,
}

impl SetHeaderRule {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl Rule for SetHeaderRule {
    fn name(&self) -> &str {
        "set_header"
    }

    fn evaluate(&self, _ctx: &RequestContext) -> Verdict {
        Verdict::Mutate(vec![HeaderOp::Set(self.name.clone(), self.value.clone())])
    }
}

/// Adds one header value alongside any existing ones
#[derive(Debug, Clone)]
pub struct AppendHeaderRule {
    name: HeaderName,
    value: HeaderValue,
}

impl AppendHeaderRule {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl Rule for AppendHeaderRule {
    fn name(&self) -> &str {
        "append_header"
    }

    fn evaluate(&self, _ctx: &RequestContext) -> Verdict {
        Verdict::Mutate(vec![HeaderOp::Append(self.name.clone(), self.value.clone())])
    }
}

/// Drops every value of one header
#[derive(Debug, Clone)]
pub struct RemoveHeaderRule {
    name: HeaderName,
}

impl RemoveHeaderRule {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

impl Rule for RemoveHeaderRule {
    fn name(&self) -> &str {
        "remove_header"
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        if ctx.headers().contains_key(&self.name) {
            Verdict::Mutate(vec![HeaderOp::Remove(self.name.clone())])
        } else {
            Verdict::Continue
        }
    }
}

/// Inclusive range of hours; wraps past midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start: u8,
    pub end: u8,
}

impl HourWindow {
    pub fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u8) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// Refuses requests while the clock is inside a window.
///
/// Scope it to a host with [`Condition::HostIs`](super::rules::Condition).
#[derive(Debug, Clone)]
pub struct TimeWindowRule {
    window: HourWindow,
    clock: Arc<dyn Clock>,
    rejection: Rejection,
}

impl TimeWindowRule {
    pub fn new(window: HourWindow, clock: Arc<dyn Clock>, rejection: Rejection) -> Self {
        Self {
            window,
            clock,
            rejection,
        }
    }
}

impl Rule for TimeWindowRule {
    fn name(&self) -> &str {
        "block_hours"
    }

    fn evaluate(&self, _ctx: &RequestContext) -> Verdict {
        if self.window.contains(self.clock.hour()) {
            Verdict::Reject(self.rejection.clone())
        } else {
            Verdict::Continue
        }
    }
}

/// Refuses CONNECT tunnels whose literal `host:port` target matches a pattern
#[derive(Debug, Clone)]
pub struct ConnectTargetRule {
    pattern: TargetPattern,
    rejection: Rejection,
}

impl ConnectTargetRule {
    pub fn new(pattern: TargetPattern, rejection: Rejection) -> Self {
        Self { pattern, rejection }
    }

    pub fn pattern(&self) -> &TargetPattern {
        &self.pattern
    }
}

impl Rule for ConnectTargetRule {
    fn name(&self) -> &str {
        "reject_target"
    }

    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        // Continue rather than Allow so several patterns can be chained; an
        // exhausted chain allows anyway.
        if self.pattern.matches(&ctx.target().authority) {
            Verdict::Reject(self.rejection.clone())
        } else {
            Verdict::Continue
        }
    }
}
