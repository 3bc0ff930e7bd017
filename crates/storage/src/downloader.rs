//! Seams to the piece-download machinery.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tonindex_core::Id32;

/// Location of one file inside a bag's concatenated piece space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Index of the piece holding the file's first byte.
    pub first_piece: u32,
    /// Byte offset of the file within that piece.
    pub first_piece_offset: u64,
    /// File size in bytes.
    pub size: u64,
}

/// Immutable bag metadata learned during the admission handshake.
#[derive(Debug, Clone)]
pub struct BagInfo {
    /// Fixed piece size in bytes.
    pub piece_size: u64,
    /// Total number of pieces in the bag.
    pub pieces_total: u32,
    /// File table keyed by name.
    pub files: HashMap<String, FileInfo>,
}

impl BagInfo {
    /// Look up a file by name.
    pub fn file(&self, name: &str) -> Option<&FileInfo> {
        self.files.get(name)
    }
}

/// Fetches individual pieces of one bag from its seeders.
#[async_trait]
pub trait PieceDownloader: Send + Sync {
    /// Download one piece. Internal cancellation is reported as
    /// [`StorageError::DownloadCancelled`](crate::StorageError::DownloadCancelled)
    /// so callers can retry while their own context is alive.
    async fn download_piece(&self, piece: u32) -> StorageResult<Bytes>;

    /// Stop the downloader; subsequent fetches fail.
    fn close(&self);
}

/// Performs the admission handshake for a bag: locates seeders, fetches the
/// bag's metadata, and yields a downloader for its pieces.
#[async_trait]
pub trait BagConnector: Send + Sync {
    async fn open_bag(&self, id: &Id32) -> StorageResult<(BagInfo, Arc<dyn PieceDownloader>)>;
}
