//! Concurrency budget.
//!
//! A limit is never rejected. Missing, zero, negative or unparseable values
//! all collapse to a single slot so a limiter always makes forward progress.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Maximum number of items a limiter runs at once.
///
/// Deserializes from any value: integers and floats are coerced, strings go
/// through [`Limit::parse_lenient`], anything else becomes 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<RawLimit>", into = "usize")]
pub struct Limit(NonZeroUsize);

/// A limit as written in a config file, before coercion.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Int(i64),
    Float(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

impl From<Option<RawLimit>> for Limit {
    fn from(raw: Option<RawLimit>) -> Self {
        match raw {
            Some(RawLimit::Int(n)) => Self::coerce(Some(n)),
            Some(RawLimit::Float(n)) => Self::coerce_f64(n),
            Some(RawLimit::Text(text)) => Self::parse_lenient(&text),
            Some(RawLimit::Other(_)) | None => Self::ONE,
        }
    }
}

impl Limit {
    pub const ONE: Limit = Limit(NonZeroUsize::MIN);

    /// Normalize a raw, possibly absent, signed value.
    pub fn coerce(raw: Option<i64>) -> Self {
        match raw {
            Some(n) if n > 0 => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Limit)
                .unwrap_or(Limit(NonZeroUsize::MAX)),
            _ => Self::ONE,
        }
    }

    /// Normalize a fractional value. A slot count of 2.5 admits a third item
    /// while two are running, so fractions round up; NaN and values below 1
    /// become 1.
    pub fn coerce_f64(raw: f64) -> Self {
        if raw.is_nan() || raw < 1.0 {
            return Self::ONE;
        }
        // `as` saturates at i64::MAX for large or infinite values.
        Self::coerce(Some(raw.ceil() as i64))
    }

    /// Parse text, treating anything that is not a positive number as 1.
    pub fn parse_lenient(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(n) => Self::coerce(Some(n)),
            Err(_) => raw.parse::<f64>().map(Self::coerce_f64).unwrap_or(Self::ONE),
        }
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self::ONE
    }
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZeroUsize::new(value).map(Limit).unwrap_or(Self::ONE)
    }
}

impl From<i32> for Limit {
    fn from(value: i32) -> Self {
        Self::coerce(Some(i64::from(value)))
    }
}

impl From<i64> for Limit {
    fn from(value: i64) -> Self {
        Self::coerce(Some(value))
    }
}

impl From<Option<usize>> for Limit {
    fn from(value: Option<usize>) -> Self {
        value.map(Limit::from).unwrap_or_default()
    }
}

impl From<Option<i64>> for Limit {
    fn from(value: Option<i64>) -> Self {
        Self::coerce(value)
    }
}

impl From<NonZeroUsize> for Limit {
    fn from(value: NonZeroUsize) -> Self {
        Limit(value)
    }
}

impl From<Limit> for usize {
    fn from(value: Limit) -> Self {
        value.get()
    }
}

impl FromStr for Limit {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_lenient(s))
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
