//! Bag provider and piece fetcher for the tonindex gateway.
//!
//! A bag is a content-addressed collection of fixed-size pieces plus a file
//! index, identified by a 32-byte hash. This crate keeps active bags in an
//! in-memory map with single-flight admission and TTL eviction, and streams
//! file byte ranges by fetching pieces through a bounded prefetcher. The
//! underlying piece-download machinery is reached through the
//! [`BagConnector`]/[`PieceDownloader`] seams; the [`memory`] module carries
//! an in-process seeder for development and tests.

pub mod downloader;
pub mod error;
pub mod memory;
pub mod prefetch;
pub mod provider;
pub mod singleflight;

pub use downloader::{BagConnector, BagInfo, FileInfo, PieceDownloader};
pub use error::{SharedError, StorageError, StorageResult};
pub use provider::{Bag, BagProvider};
pub use singleflight::Group;

/// Seconds since the unix epoch, saturating at zero.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
