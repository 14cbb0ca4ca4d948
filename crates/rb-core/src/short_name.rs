//! Board short names.
//!
//! The short name is a board's primary identity and ends up inside physical
//! table names, so it is held to a strict allow-list at creation time.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Maximum short name length. Keeps `message_replies_<name>` and the cache
/// index name under Postgres' 63-byte identifier limit.
pub const MAX_SHORT_NAME_LEN: usize = 32;

static SHORT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_]{0,31}$").expect("invalid short name regex"));

/// Validated board short name (e.g. `b`, `tech`, `dev_ops`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortName(String);

impl ShortName {
    /// Lowercase ASCII letters, digits and underscores, starting with a
    /// letter or digit, at most [`MAX_SHORT_NAME_LEN`] bytes.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        if s.is_empty() {
            return Err(AppError::ValidationError(
                "board short name cannot be empty".into(),
            ));
        }
        if s.len() > MAX_SHORT_NAME_LEN {
            return Err(AppError::ValidationError(format!(
                "board short name exceeds {} characters",
                MAX_SHORT_NAME_LEN
            )));
        }
        if !SHORT_NAME_RE.is_match(s) {
            return Err(AppError::ValidationError(format!(
                "board short name '{}' must be lowercase alphanumeric with underscores",
                s
            )));
        }
        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShortName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ShortName {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShortName> for String {
    fn from(name: ShortName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        for name in ["b", "tech", "dev_ops", "4chan", "a_1"] {
            assert!(ShortName::parse(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_injection_and_odd_characters() {
        for name in [
            "",
            "_lead",
            "Upper",
            "with-dash",
            "b\"; DROP TABLE boards; --",
            "b' OR '1'='1",
            "space name",
            "ünï",
        ] {
            assert!(
                matches!(ShortName::parse(name), Err(AppError::ValidationError(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let ok = "a".repeat(MAX_SHORT_NAME_LEN);
        let too_long = "a".repeat(MAX_SHORT_NAME_LEN + 1);
        assert!(ShortName::parse(&ok).is_ok());
        assert!(ShortName::parse(&too_long).is_err());
    }
}
