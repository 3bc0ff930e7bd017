//! Combined metadata store trait.

use crate::error::MetadataResult;
use crate::repos::{CrawlerStateRepo, SitesRepo};
use async_trait::async_trait;

/// Everything the rest of the system needs from the relational store.
#[async_trait]
pub trait MetadataStore: SitesRepo + CrawlerStateRepo + Send + Sync {
    /// Run idempotent schema bootstrap.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;
}
