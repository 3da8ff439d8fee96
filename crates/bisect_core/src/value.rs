//! Scalar field values carried alongside checkpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named scalar field value: either a number or a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Integer value, kept exact
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value (routes, flags, identifiers)
    Text(String),
}

impl ScalarValue {
    /// Convert a JSON value into a scalar, if it is one
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(Self::Text(b.to_string())),
            _ => None,
        }
    }

    /// Numeric view of the value, if any
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Exact categorical equality.
    ///
    /// Integers and floats compare numerically so `3` equals `3.0`; text
    /// never equals a number. An integer only equals a float that is whole
    /// and converts back to the same integer, so ids beyond 2^53 never match
    /// a neighbouring float.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(i), Self::Float(f)) | (Self::Float(f), Self::Int(i)) => int_equals_float(*i, *f),
            (Self::Text(_), _) | (_, Self::Text(_)) => false,
        }
    }
}

fn int_equals_float(i: i64, f: f64) -> bool {
    // i64::MAX as f64 rounds up to 2^63, which is out of range
    if f.fract() != 0.0 || !(-(2f64.powi(63))..2f64.powi(63)).contains(&f) {
        return false;
    }
    f as i64 == i && i as f64 == f
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
