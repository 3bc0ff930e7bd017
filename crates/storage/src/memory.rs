//! In-memory bag seeder.
//!
//! Serves bags straight from process memory: the development backend for
//! running without the overlay network, and the backend every test drives.
//! Pieces never touch a filesystem, matching the gateway's cache-only
//! storage model.

use crate::downloader::{BagConnector, BagInfo, FileInfo, PieceDownloader};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonindex_core::Id32;

/// Builds the content and file table of an in-memory bag.
pub struct MemoryBagBuilder {
    piece_size: u64,
    content: Vec<u8>,
    files: HashMap<String, FileInfo>,
}

impl MemoryBagBuilder {
    pub fn new(piece_size: u64) -> Self {
        Self {
            piece_size: piece_size.max(1),
            content: Vec::new(),
            files: HashMap::new(),
        }
    }

    /// Append a file to the bag's concatenated content.
    pub fn file(mut self, name: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref();
        let offset = self.content.len() as u64;
        self.files.insert(
            name.into(),
            FileInfo {
                first_piece: (offset / self.piece_size) as u32,
                first_piece_offset: offset % self.piece_size,
                size: data.len() as u64,
            },
        );
        self.content.extend_from_slice(data);
        self
    }

    fn build(self) -> SeededBag {
        SeededBag {
            info: BagInfo {
                piece_size: self.piece_size,
                pieces_total: self.content.len().div_ceil(self.piece_size as usize) as u32,
                files: self.files,
            },
            content: self.content.into(),
        }
    }
}

struct SeededBag {
    info: BagInfo,
    content: Arc<[u8]>,
}

#[derive(Default)]
struct Inner {
    bags: Mutex<HashMap<Id32, Arc<SeededBag>>>,
    opens: AtomicU64,
    fetches: AtomicU64,
    in_flight: Mutex<HashMap<(Id32, u32), u32>>,
    concurrent_duplicates: AtomicU64,
    piece_delay: Mutex<Option<Duration>>,
    cancel_once: Mutex<HashSet<(Id32, u32)>>,
}

/// A [`BagConnector`] over in-process bags, with counters and failure
/// injection for exercising the provider.
#[derive(Default, Clone)]
pub struct MemoryBagConnector {
    inner: Arc<Inner>,
}

impl MemoryBagConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a bag under `id`.
    pub fn seed(&self, id: Id32, builder: MemoryBagBuilder) {
        self.inner
            .bags
            .lock()
            .expect("seeder lock poisoned")
            .insert(id, Arc::new(builder.build()));
    }

    /// Number of admission handshakes performed.
    pub fn opens(&self) -> u64 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Number of piece downloads performed across all bags.
    pub fn fetches(&self) -> u64 {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Number of times a piece was downloaded while another download of
    /// the same piece was still in flight.
    pub fn concurrent_duplicates(&self) -> u64 {
        self.inner.concurrent_duplicates.load(Ordering::SeqCst)
    }

    /// Delay every piece download, widening race windows under test.
    pub fn set_piece_delay(&self, delay: Duration) {
        *self.inner.piece_delay.lock().expect("seeder lock poisoned") = Some(delay);
    }

    /// Make the next download of `piece` in `bag` fail with an internal
    /// cancellation, exercising the masked-retry path.
    pub fn cancel_once(&self, bag: Id32, piece: u32) {
        self.inner
            .cancel_once
            .lock()
            .expect("seeder lock poisoned")
            .insert((bag, piece));
    }
}

#[async_trait]
impl BagConnector for MemoryBagConnector {
    async fn open_bag(&self, id: &Id32) -> StorageResult<(BagInfo, Arc<dyn PieceDownloader>)> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        let bag = self
            .inner
            .bags
            .lock()
            .expect("seeder lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::Admission(format!("no seeders found for bag {id}")))?;
        let info = bag.info.clone();
        let downloader = Arc::new(MemoryPieceDownloader {
            inner: self.inner.clone(),
            bag_id: *id,
            bag,
            closed: AtomicBool::new(false),
        });
        Ok((info, downloader))
    }
}

struct MemoryPieceDownloader {
    inner: Arc<Inner>,
    bag_id: Id32,
    bag: Arc<SeededBag>,
    closed: AtomicBool,
}

#[async_trait]
impl PieceDownloader for MemoryPieceDownloader {
    async fn download_piece(&self, piece: u32) -> StorageResult<Bytes> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        let injected = self
            .inner
            .cancel_once
            .lock()
            .expect("seeder lock poisoned")
            .remove(&(self.bag_id, piece));
        if injected {
            return Err(StorageError::DownloadCancelled);
        }
        if piece >= self.bag.info.pieces_total {
            return Err(StorageError::Download(format!(
                "piece {piece} out of range for bag {}",
                self.bag_id
            )));
        }

        {
            let mut in_flight = self.inner.in_flight.lock().expect("seeder lock poisoned");
            let entry = in_flight.entry((self.bag_id, piece)).or_insert(0);
            *entry += 1;
            if *entry > 1 {
                self.inner
                    .concurrent_duplicates
                    .fetch_add(1, Ordering::SeqCst);
            }
        }
        let delay = *self.inner.piece_delay.lock().expect("seeder lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut in_flight = self.inner.in_flight.lock().expect("seeder lock poisoned");
            if let Some(entry) = in_flight.get_mut(&(self.bag_id, piece)) {
                *entry = entry.saturating_sub(1);
            }
        }

        let piece_size = self.bag.info.piece_size as usize;
        let start = piece as usize * piece_size;
        let end = (start + piece_size).min(self.bag.content.len());
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::copy_from_slice(&self.bag.content[start..end]))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
