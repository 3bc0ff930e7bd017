//! Crawler-state repository.

use crate::error::MetadataResult;
use async_trait::async_trait;

/// Durable pagination offsets, keyed by the source collection address.
#[async_trait]
pub trait CrawlerStateRepo: Send + Sync {
    /// The persisted offset for a source; an unknown source reads as 0.
    async fn get_offset(&self, dns: &str) -> MetadataResult<i64>;

    /// Persist a source's offset.
    async fn set_offset(&self, dns: &str, offset: i64) -> MetadataResult<()>;
}
