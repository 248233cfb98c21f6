//! Pattern matching for hosts and CONNECT targets

use regex::{Regex, RegexBuilder};
use std::fmt;

use crate::error::{Error, Result};

/// A compiled glob pattern where `*` matches any run of characters
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    segments: Vec<Segment>,
    case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Wildcard,
}

impl PatternMatcher {
    /// Compile a case-sensitive glob pattern
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            segments: Self::compile(pattern),
            case_insensitive: false,
        }
    }

    /// Compile a glob pattern that ignores ASCII case
    pub fn case_insensitive(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            segments: Self::compile(&pattern.to_ascii_lowercase()),
            case_insensitive: true,
        }
    }

    fn compile(pattern: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut literal = String::new();

        for ch in pattern.chars() {
            if ch != '*' {
                literal.push(ch);
                continue;
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            // a** is a*
            if segments.last() != Some(&Segment::Wildcard) {
                segments.push(Segment::Wildcard);
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        segments
    }

    /// Check whether the whole of `text` matches the pattern
    pub fn matches(&self, text: &str) -> bool {
        if self.case_insensitive {
            self.match_segments(&text.to_ascii_lowercase())
        } else {
            self.match_segments(text)
        }
    }

    fn match_segments(&self, text: &str) -> bool {
        let mut segments = self.segments.as_slice();
        let mut rest = text;

        // Anchored prefix
        if let Some((Segment::Literal(lit), tail)) = segments.split_first() {
            match rest.strip_prefix(lit.as_str()) {
                Some(r) => rest = r,
                None => return false,
            }
            segments = tail;
        }

        // Anchored suffix, only when something precedes it
        let mut suffix = None;
        if let Some((Segment::Literal(lit), head)) = segments.split_last() {
            suffix = Some(lit.as_str());
            segments = head;
        }

        if segments.is_empty() {
            return match suffix {
                Some(s) => rest == s,
                None => rest.is_empty(),
            };
        }

        if let Some(s) = suffix {
            match rest.strip_suffix(s) {
                Some(r) => rest = r,
                None => return false,
            }
        }

        // Between the anchors only `* lit * lit ... *` remains; leftmost
        // placement of each literal is always safe.
        for segment in segments {
            if let Segment::Literal(lit) = segment {
                match rest.find(lit.as_str()) {
                    Some(idx) => rest = &rest[idx + lit.len()..],
                    None => return false,
                }
            }
        }

        true
    }

    /// Get the original pattern string
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if this pattern is a plain literal (no wildcards)
    pub fn is_literal(&self) -> bool {
        !self.segments.contains(&Segment::Wildcard)
    }
}

/// A case-insensitive pattern tested against CONNECT target text (`host:port`)
#[derive(Debug, Clone)]
pub enum TargetPattern {
    Glob(PatternMatcher),
    Regex(Regex),
}

impl TargetPattern {
    pub fn glob(pattern: &str) -> Self {
        TargetPattern::Glob(PatternMatcher::case_insensitive(pattern))
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(TargetPattern::Regex)
            .map_err(|e| Error::pattern(format!("invalid regex {:?}: {}", pattern, e)))
    }

    pub fn matches(&self, target: &str) -> bool {
        match self {
            TargetPattern::Glob(m) => m.matches(target),
            TargetPattern::Regex(re) => re.is_match(target),
        }
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPattern::Glob(m) => write!(f, "{}", m.pattern()),
            TargetPattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}
