//! Interceptors for plain HTTP requests and CONNECT tunnels, and the policy
//! that holds both

use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;

use super::builtin::{
    AppendHeaderRule, ConnectTargetRule, HourWindow, RemoveHeaderRule, SetHeaderRule,
    TimeWindowRule, WhitelistRule,
};
use super::chain::{Decision, RuleChain};
use super::client_ip::ForwardedForTrust;
use super::clock::Clock;
use super::context::RequestContext;
use super::matcher::{PatternMatcher, TargetPattern};
use super::rules::{Condition, Rejection};
use crate::config::{AccessConfig, Config, ConnectRule, RequestRule};
use crate::error::{Error, Result};

/// What to do with an intercepted request
#[derive(Debug)]
pub enum Interception {
    /// Send it on. For plain HTTP the context carries the rewritten headers.
    Forward {
        ctx: RequestContext,
        rule: Option<String>,
    },
    /// Answer locally; nothing is dialed.
    Respond {
        ctx: RequestContext,
        rejection: Rejection,
        rule: Option<String>,
    },
}

impl Interception {
    fn from_chain(chain: &RuleChain, mut ctx: RequestContext) -> Self {
        let outcome = chain.evaluate(&mut ctx);
        match outcome.decision {
            Decision::Allow => Interception::Forward {
                ctx,
                rule: outcome.rule,
            },
            Decision::Reject(rejection) => Interception::Respond {
                ctx,
                rejection,
                rule: outcome.rule,
            },
        }
    }
}

/// Applies the request chain to plain HTTP requests
#[derive(Debug, Default)]
pub struct RequestInterceptor {
    chain: RuleChain,
}

impl RequestInterceptor {
    pub fn new(chain: RuleChain) -> Self {
        Self { chain }
    }

    pub fn intercept(&self, ctx: RequestContext) -> Interception {
        Interception::from_chain(&self.chain, ctx)
    }

    pub fn chain(&self) -> &RuleChain {
        &self.chain
    }
}

/// Applies the CONNECT chain before a tunnel is opened
#[derive(Debug, Default)]
pub struct ConnectInterceptor {
    chain: RuleChain,
}

impl ConnectInterceptor {
    pub fn new(chain: RuleChain) -> Self {
        Self { chain }
    }

    pub fn intercept(&self, ctx: RequestContext) -> Interception {
        debug_assert!(ctx.is_connect());
        Interception::from_chain(&self.chain, ctx)
    }

    pub fn chain(&self) -> &RuleChain {
        &self.chain
    }
}

/// Immutable policy shared by every connection
#[derive(Debug)]
pub struct Policy {
    requests: RequestInterceptor,
    connects: ConnectInterceptor,
    trust: ForwardedForTrust,
}

impl Policy {
    pub fn new(requests: RuleChain, connects: RuleChain, trust: ForwardedForTrust) -> Self {
        Self {
            requests: RequestInterceptor::new(requests),
            connects: ConnectInterceptor::new(connects),
            trust,
        }
    }

    /// A policy with no rules: every request and tunnel is allowed
    pub fn permissive() -> Self {
        Self::new(
            RuleChain::empty(),
            RuleChain::empty(),
            ForwardedForTrust::FirstHop,
        )
    }

    /// Compile the configured rules, reading time-of-day from `clock`.
    ///
    /// The whitelist, when configured, is always placed first.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let whitelist = whitelist_rule(&config.access)?;

        let mut requests = RuleChain::builder();
        if let Some(ref rule) = whitelist {
            requests = requests.rule(rule.clone());
        }
        for (i, rule) in config.request_rules.iter().enumerate() {
            let ctx = |e: Error| Error::config(format!("request_rules #{}: {}", i + 1, e));
            requests = match rule {
                RequestRule::SetHeader { name, value } => {
                    let (name, value) = header_pair(name, value).map_err(ctx)?;
                    requests.rule(SetHeaderRule::new(name, value))
                }
                RequestRule::AppendHeader { name, value } => {
                    let (name, value) = header_pair(name, value).map_err(ctx)?;
                    requests.rule(AppendHeaderRule::new(name, value))
                }
                RequestRule::RemoveHeader { name } => {
                    requests.rule(RemoveHeaderRule::new(header_name(name).map_err(ctx)?))
                }
                RequestRule::BlockHours {
                    host,
                    start_hour,
                    end_hour,
                    message,
                    status,
                } => {
                    let rejection = plain_rejection(*status, message).map_err(ctx)?;
                    requests.scoped(
                        host_condition(host),
                        TimeWindowRule::new(
                            HourWindow::new(*start_hour, *end_hour),
                            clock.clone(),
                            rejection,
                        ),
                    )
                }
            };
        }

        let mut connects = RuleChain::builder();
        if config.access.apply_to_connect {
            if let Some(rule) = whitelist {
                connects = connects.rule(rule);
            }
        }
        for (i, rule) in config.connect_rules.iter().enumerate() {
            let ctx = |e: Error| Error::config(format!("connect_rules #{}: {}", i + 1, e));
            connects = match rule {
                ConnectRule::RejectTarget {
                    pattern,
                    regex,
                    message,
                    status,
                } => {
                    let pattern = if *regex {
                        TargetPattern::regex(pattern).map_err(ctx)?
                    } else {
                        TargetPattern::glob(pattern)
                    };
                    let rejection = plain_rejection(*status, message).map_err(ctx)?;
                    connects.rule(ConnectTargetRule::new(pattern, rejection))
                }
            };
        }

        let trust = if config.access.trust_forwarded_for {
            ForwardedForTrust::FirstHop
        } else {
            ForwardedForTrust::Ignore
        };

        Ok(Self {
            requests: RequestInterceptor::new(requests.build()?),
            connects: ConnectInterceptor::new(connects.build()?),
            trust,
        })
    }

    pub fn requests(&self) -> &RequestInterceptor {
        &self.requests
    }

    pub fn connects(&self) -> &ConnectInterceptor {
        &self.connects
    }

    pub fn trust(&self) -> ForwardedForTrust {
        self.trust
    }
}

fn whitelist_rule(access: &AccessConfig) -> Result<Option<WhitelistRule>> {
    let Some(ref ips) = access.whitelist else {
        return Ok(None);
    };
    let allowed: HashSet<String> = ips.iter().cloned().collect();
    let rejection = plain_rejection(access.status, &access.message)
        .map_err(|e| Error::config(format!("access: {}", e)))?;
    Ok(Some(WhitelistRule::with_rejection(
        Arc::new(allowed),
        rejection,
    )))
}

/// Hosts with a `*` are globs; anything else must match exactly.
fn host_condition(host: &str) -> Condition {
    if host.contains('*') {
        Condition::HostMatches(PatternMatcher::case_insensitive(host))
    } else {
        Condition::HostIs(host.to_string())
    }
}

fn plain_rejection(status: u16, message: &str) -> Result<Rejection> {
    let status = StatusCode::from_u16(status)
        .map_err(|_| Error::config(format!("invalid status code {}", status)))?;
    Ok(Rejection::new(status, "text/plain", message))
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::config(format!("invalid header name {:?}", name)))
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| Error::config(format!("invalid value for header {:?}", name)))?;
    Ok((header_name(name)?, value))
}
