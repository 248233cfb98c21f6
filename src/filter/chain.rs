//! Ordered, short-circuiting rule chain

use std::fmt;

use super::context::RequestContext;
use super::rules::{Condition, Rejection, Rule, Verdict};
use crate::error::{Error, Result};

/// Final decision for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Reject(Rejection),
}

/// Result of running a chain: the decision and the rule that made it.
///
/// `rule` is None when the chain ran out without a terminal verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub decision: Decision,
    pub rule: Option<String>,
}

impl Outcome {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

struct ChainEntry {
    condition: Condition,
    rule: Box<dyn Rule>,
}

/// Rules in a fixed evaluation order
pub struct RuleChain {
    entries: Vec<ChainEntry>,
}

impl RuleChain {
    pub fn builder() -> RuleChainBuilder {
        RuleChainBuilder::default()
    }

    /// A chain with no rules allows everything
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Run the rules in order against `ctx`.
    ///
    /// `Mutate` verdicts are applied to `ctx` before the next rule runs. The
    /// first `Allow` or `Reject` ends evaluation.
    pub fn evaluate(&self, ctx: &mut RequestContext) -> Outcome {
        for entry in &self.entries {
            if !entry.condition.applies(ctx) {
                continue;
            }
            match entry.rule.evaluate(ctx) {
                Verdict::Continue => {}
                Verdict::Mutate(ops) => ctx.apply(&ops),
                Verdict::Allow => {
                    return Outcome {
                        decision: Decision::Allow,
                        rule: Some(entry.rule.name().to_string()),
                    };
                }
                Verdict::Reject(rejection) => {
                    return Outcome {
                        decision: Decision::Reject(rejection),
                        rule: Some(entry.rule.name().to_string()),
                    };
                }
            }
        }

        Outcome {
            decision: Decision::Allow,
            rule: None,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.entries.len()
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.rule.name()).collect()
    }
}

impl Default for RuleChain {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RuleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rule_names()).finish()
    }
}

#[derive(Default)]
pub struct RuleChainBuilder {
    entries: Vec<ChainEntry>,
}

impl RuleChainBuilder {
    /// Append a rule that applies to every request
    pub fn rule(self, rule: impl Rule + 'static) -> Self {
        self.scoped(Condition::Always, rule)
    }

    /// Append a rule that only runs when `condition` holds
    pub fn scoped(self, condition: Condition, rule: impl Rule + 'static) -> Self {
        self.boxed(condition, Box::new(rule))
    }

    pub fn boxed(mut self, condition: Condition, rule: Box<dyn Rule>) -> Self {
        self.entries.push(ChainEntry { condition, rule });
        self
    }

    /// Finish the chain, refusing any access gate placed after another rule
    /// or behind a condition.
    pub fn build(self) -> Result<RuleChain> {
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.rule.is_access_gate() {
                continue;
            }
            if i != 0 {
                return Err(Error::config(format!(
                    "access rule '{}' must be first in its chain (found at position {})",
                    entry.rule.name(),
                    i + 1
                )));
            }
            if !matches!(entry.condition, Condition::Always) {
                return Err(Error::config(format!(
                    "access rule '{}' cannot be scoped",
                    entry.rule.name()
                )));
            }
        }
        Ok(RuleChain {
            entries: self.entries,
        })
    }
}
