//! Row models for the metadata store.

use sqlx::FromRow;
use time::OffsetDateTime;
use tonindex_core::SortBy;

/// Reachability classification of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum SiteStatus {
    /// The domain carries no site record.
    NoSite = 0,
    /// A record exists but the endpoint did not answer.
    Inaccessible = 1,
    /// The endpoint answered.
    Accessible = 2,
}

impl SiteStatus {
    pub fn from_i16(v: i16) -> Self {
        match v {
            2 => Self::Accessible,
            1 => Self::Inaccessible,
            _ => Self::NoSite,
        }
    }
}

/// One site row.
#[derive(Debug, Clone, FromRow)]
pub struct SiteRow {
    pub domain: String,
    pub unicode: String,
    pub address: String,
    pub status: i16,
    pub in_storage: bool,
    pub spam_content: bool,
    pub checked_at: OffsetDateTime,
}

impl SiteRow {
    pub fn status(&self) -> SiteStatus {
        SiteStatus::from_i16(self.status)
    }
}

/// A freshly crawled domain.
#[derive(Debug, Clone)]
pub struct SiteCreate {
    pub domain: String,
    pub unicode: String,
    pub zone: String,
    pub address: String,
}

/// Aggregate site counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_domains: i64,
    pub total_sites: i64,
    pub active_sites: i64,
}

/// Filters for the sites listing.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    /// Substring search over domains; LIKE wildcards are escaped.
    pub search: String,
    /// Widen from accessible-only to everything with a site record.
    pub inaccessible: bool,
    /// `Some(true)` keeps punycode domains only, `Some(false)` plain ones.
    pub punycode: Option<bool>,
    /// Include sites flagged as spam.
    pub spam: bool,
    /// Restrict to one zone; empty means all.
    pub zone: String,
    pub sort: SortBy,
    pub desc: bool,
}
