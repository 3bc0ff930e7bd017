//! Host resolution dispatch.
//!
//! Canonical hosts resolve in three ways: `.adnl` hosts carry the node key
//! inline, `.bag` hosts carry the bag id inline, and everything else asks
//! the on-chain resolver for the domain's site record.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tonindex_core::{Id32, parse_adnl};

/// A domain's site record: where it points and how to fetch it.
#[derive(Debug, Clone, Copy)]
pub struct SiteRecord {
    /// Bag id or node key.
    pub id: Id32,
    /// Whether the record points into content storage.
    pub in_storage: bool,
}

/// Resolution errors; all of them surface as client errors on the edge.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid address in host {host:?}: {reason}")]
    BadAddress { host: String, reason: String },

    #[error("no site record found for {0:?}")]
    NoRecord(String),

    #[error("resolver failed for {host:?}: {reason}")]
    Upstream { host: String, reason: String },
}

/// The on-chain name resolver seam.
#[async_trait]
pub trait SiteResolver: Send + Sync {
    /// Look up the site record of `domain`, `None` when the domain has
    /// no record.
    async fn resolve_site(&self, domain: &str) -> Result<Option<SiteRecord>, ResolveError>;
}

/// Resolve a canonical host to its target identifier.
pub async fn resolve_host(
    resolver: &dyn SiteResolver,
    host: &str,
) -> Result<(Id32, bool), ResolveError> {
    if let Some(body) = host.strip_suffix(".adnl") {
        let id = parse_adnl(body).map_err(|e| ResolveError::BadAddress {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        return Ok((id, false));
    }
    if let Some(body) = host.strip_suffix(".bag") {
        let id = Id32::from_hex(body).map_err(|e| ResolveError::BadAddress {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        return Ok((id, true));
    }

    match resolver.resolve_site(host).await? {
        Some(record) => Ok((record.id, record.in_storage)),
        None => Err(ResolveError::NoRecord(host.to_string())),
    }
}

/// A table-backed resolver for development and tests.
#[derive(Default)]
pub struct StaticResolver {
    records: Mutex<HashMap<String, SiteRecord>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a domain's record.
    pub fn insert(&self, domain: impl Into<String>, record: SiteRecord) {
        self.records
            .lock()
            .expect("resolver lock poisoned")
            .insert(domain.into(), record);
    }
}

#[async_trait]
impl SiteResolver for StaticResolver {
    async fn resolve_site(&self, domain: &str) -> Result<Option<SiteRecord>, ResolveError> {
        Ok(self
            .records
            .lock()
            .expect("resolver lock poisoned")
            .get(domain)
            .copied())
    }
}
