//! Keyset pagination cursors for the sites listing.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use serde::Deserialize;
use std::fmt;

/// Sort column for the sites listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Domain,
    CheckedAt,
}

impl SortBy {
    /// The SQL column this sort key orders by.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::CheckedAt => "checked_at",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Keyset cursor: the last row's sort value (unix seconds, when sorting by
/// a timestamp) and its domain as the deterministic tiebreak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub value: Option<i64>,
    pub domain: String,
}

impl Cursor {
    /// Opaque transport form: URL-safe base64 of `<value>:<domain>` or the
    /// bare domain when there is no sort value.
    pub fn encode(&self) -> String {
        let raw = match self.value {
            Some(v) => format!("{v}:{}", self.domain),
            None => self.domain.clone(),
        };
        URL_SAFE.encode(raw)
    }

    /// Decode a transport-form cursor for the given sort column.
    pub fn decode(s: &str, sort: SortBy) -> Result<Self> {
        let data = URL_SAFE
            .decode(s)
            .map_err(|e| Error::InvalidCursor(format!("invalid base64: {e}")))?;
        let raw = String::from_utf8(data)
            .map_err(|_| Error::InvalidCursor("cursor is not valid utf-8".into()))?;

        if sort == SortBy::Domain {
            return Ok(Self {
                value: None,
                domain: raw,
            });
        }

        let (value, domain) = raw
            .split_once(':')
            .ok_or_else(|| Error::InvalidCursor(format!("invalid cursor format {raw:?}")))?;
        let value: i64 = value
            .parse()
            .map_err(|_| Error::InvalidCursor(format!("invalid cursor value {value:?}")))?;
        Ok(Self {
            value: Some(value),
            domain: domain.to_string(),
        })
    }
}
