//! Request interception: client identity, rules and the chains that run them

pub mod builtin;
pub mod chain;
pub mod client_ip;
pub mod clock;
pub mod context;
pub mod intercept;
pub mod matcher;
pub mod rules;

pub use chain::{Decision, Outcome, RuleChain, RuleChainBuilder};
pub use client_ip::ForwardedForTrust;
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::{HeaderOp, RequestContext, Target};
pub use intercept::{ConnectInterceptor, Interception, Policy, RequestInterceptor};
pub use matcher::{PatternMatcher, TargetPattern};
pub use rules::{Condition, Rejection, Rule, Verdict};
