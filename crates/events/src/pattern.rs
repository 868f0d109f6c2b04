//! Event-type patterns.
//!
//! ```text
//! "git-operation"   → Exact
//! "git-*"           → Prefix("git-")
//! "*"               → Any
//! ```

use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Matcher applied to an event's type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// Matches every event type.
    Any,
    /// Matches types starting with the given prefix.
    Prefix(String),
    /// Matches exactly one event type.
    Exact(String),
}

impl EventPattern {
    /// Parse a pattern string.
    ///
    /// A `*` may appear at most once and only as the last character. Empty
    /// patterns and patterns containing whitespace are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::invalid_pattern(raw, "pattern is empty"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(Error::invalid_pattern(raw, "pattern contains whitespace"));
        }

        match raw.find('*') {
            None => Ok(Self::Exact(raw.to_string())),
            Some(pos) if pos + 1 != raw.len() => Err(Error::invalid_pattern(
                raw,
                "'*' is only allowed as the last character",
            )),
            Some(0) => Ok(Self::Any),
            Some(pos) => Ok(Self::Prefix(raw[..pos].to_string())),
        }
    }

    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => event_type.starts_with(prefix.as_str()),
            Self::Exact(exact) => exact == event_type,
        }
    }

    /// Exact > prefix > wildcard. Informational only: delivery order is
    /// decided by subscription priority and registration order.
    #[must_use]
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Prefix(_) => 1,
            Self::Exact(_) => 2,
        }
    }
}

impl FromStr for EventPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}
