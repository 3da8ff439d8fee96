//! Checkpoint patterns.
//!
//! A pattern is an exact checkpoint id, a `prefix*` naming a checkpoint
//! kind, or `*` matching everything.

use bisect_core::CheckpointId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pattern parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Empty pattern
    #[error("empty checkpoint pattern")]
    Empty,
    /// Wildcard anywhere but the end
    #[error("wildcard must be the last character in {0:?}")]
    InnerWildcard(String),
}

/// Checkpoint pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CheckpointPattern {
    /// Exact checkpoint id
    Exact(String),
    /// Every checkpoint id starting with the prefix
    Prefix(String),
    /// Every checkpoint
    Any,
}

impl CheckpointPattern {
    /// True if the checkpoint matches
    #[must_use]
    pub fn matches(&self, checkpoint: &CheckpointId) -> bool {
        match self {
            Self::Exact(id) => checkpoint.as_str() == id,
            Self::Prefix(prefix) => checkpoint.as_str().starts_with(prefix.as_str()),
            Self::Any => true,
        }
    }
}

impl FromStr for CheckpointPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PatternError::Empty);
        }
        if s == "*" {
            return Ok(Self::Any);
        }
        match s.find('*') {
            None => Ok(Self::Exact(s.to_string())),
            Some(i) if i == s.len() - 1 => Ok(Self::Prefix(s[..i].to_string())),
            Some(_) => Err(PatternError::InnerWildcard(s.to_string())),
        }
    }
}

impl TryFrom<String> for CheckpointPattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CheckpointPattern> for String {
    fn from(pattern: CheckpointPattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for CheckpointPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(id) => f.write_str(id),
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
            Self::Any => f.write_str("*"),
        }
    }
}
