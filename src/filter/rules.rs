//! Rule trait, verdicts and applicability conditions

use hyper::StatusCode;
use std::fmt::Debug;

use super::context::{HeaderOp, RequestContext};
use super::matcher::PatternMatcher;

/// A locally synthesized refusal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub content_type: String,
    pub body: String,
}

impl Rejection {
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// 403 with a plain-text message
    pub fn forbidden(body: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "text/plain", body)
    }
}

/// Outcome of evaluating a single rule
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// No opinion; move on to the next rule
    Continue,
    /// Stop here and forward the request
    Allow,
    /// Stop here and answer locally
    Reject(Rejection),
    /// Apply these header changes, then move on
    Mutate(Vec<HeaderOp>),
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Allow | Verdict::Reject(_))
    }
}

/// A policy check over request metadata.
///
/// Rules are pure: they must not block, and everything they need is already
/// in the context.
pub trait Rule: Send + Sync + Debug {
    /// Short identifier used in logs and the audit trail
    fn name(&self) -> &str;

    fn evaluate(&self, ctx: &RequestContext) -> Verdict;

    /// Access gates must run before anything else in a chain.
    fn is_access_gate(&self) -> bool {
        false
    }
}

/// When a chain entry applies
#[derive(Debug, Clone)]
pub enum Condition {
    Always,
    /// Target host equals this name (ASCII case-insensitive)
    HostIs(String),
    HostMatches(PatternMatcher),
}

impl Condition {
    pub fn applies(&self, ctx: &RequestContext) -> bool {
        match self {
            Condition::Always => true,
            Condition::HostIs(host) => ctx.target().host.eq_ignore_ascii_case(host),
            Condition::HostMatches(pattern) => pattern.matches(&ctx.target().host),
        }
    }
}
