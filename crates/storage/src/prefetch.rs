//! Bounded piece prefetching.

use crate::downloader::PieceDownloader;
use crate::error::{SharedError, StorageError};
use crate::singleflight::Group;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Downloaded-but-unconsumed pieces held beyond the worker count.
const PREFETCH_BUFFER: usize = 32;

enum Slot {
    Ready(Bytes, #[allow(dead_code)] OwnedSemaphorePermit),
    Failed(SharedError, #[allow(dead_code)] OwnedSemaphorePermit),
}

struct FetcherShared {
    downloader: Arc<dyn PieceDownloader>,
    /// Bag-level download coalescing, shared with every other fetcher on
    /// the same bag so a piece is downloaded at most once concurrently.
    flight: Arc<Group<u32, Bytes>>,
    queue: Mutex<VecDeque<u32>>,
    slots: Mutex<HashMap<u32, Slot>>,
    ready: Notify,
    buffer: Arc<Semaphore>,
}

/// Prefetches exactly the pieces of one byte-range window, `workers` at a
/// time, bounding memory by parking completed pieces behind a semaphore
/// until the consumer frees them. Dropping the fetcher stops its workers.
pub struct PieceFetcher {
    shared: Arc<FetcherShared>,
    cancel: CancellationToken,
    _stop: DropGuard,
}

impl PieceFetcher {
    pub fn new(
        downloader: Arc<dyn PieceDownloader>,
        flight: Arc<Group<u32, Bytes>>,
        window: RangeInclusive<u32>,
        workers: usize,
    ) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(FetcherShared {
            downloader,
            flight,
            queue: Mutex::new(window.collect()),
            slots: Mutex::new(HashMap::new()),
            ready: Notify::new(),
            buffer: Arc::new(Semaphore::new(workers + PREFETCH_BUFFER)),
        });
        let cancel = CancellationToken::new();
        for _ in 0..workers {
            tokio::spawn(worker(shared.clone(), cancel.clone()));
        }
        Self {
            shared,
            cancel: cancel.clone(),
            _stop: cancel.drop_guard(),
        }
    }

    /// Wait until `piece` is fetched and return its bytes.
    pub async fn wait_get(&self, piece: u32) -> Result<Bytes, SharedError> {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            // register before checking so a publication in between is
            // not lost
            notified.as_mut().enable();
            {
                let slots = self.shared.slots.lock().expect("fetcher lock poisoned");
                match slots.get(&piece) {
                    Some(Slot::Ready(data, _)) => return Ok(data.clone()),
                    Some(Slot::Failed(err, _)) => return Err(err.clone()),
                    None => {}
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(SharedError::new(StorageError::Cancelled));
                }
                _ = &mut notified => {}
            }
        }
    }

    /// Release `piece`: the consumer is done with it, whether or not the
    /// fetch succeeded.
    pub fn free(&self, piece: u32) {
        self.shared
            .queue
            .lock()
            .expect("fetcher lock poisoned")
            .retain(|p| *p != piece);
        self.shared
            .slots
            .lock()
            .expect("fetcher lock poisoned")
            .remove(&piece);
    }

    /// Forget a failed fetch and download the piece again.
    pub fn refetch(&self, piece: u32) {
        self.shared
            .slots
            .lock()
            .expect("fetcher lock poisoned")
            .remove(&piece);
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = shared.buffer.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            fetch_one(&shared, &cancel, piece, permit).await;
        });
    }
}

async fn worker(shared: Arc<FetcherShared>, cancel: CancellationToken) {
    loop {
        // Acquire the buffer slot before claiming an index so the lowest
        // outstanding piece is always first in line for a permit.
        let permit = tokio::select! {
            _ = cancel.cancelled() => return,
            permit = shared.buffer.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        let piece = {
            let mut queue = shared.queue.lock().expect("fetcher lock poisoned");
            match queue.pop_front() {
                Some(piece) => piece,
                None => return,
            }
        };
        fetch_one(&shared, &cancel, piece, permit).await;
    }
}

async fn fetch_one(
    shared: &FetcherShared,
    cancel: &CancellationToken,
    piece: u32,
    permit: OwnedSemaphorePermit,
) {
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(SharedError::new(StorageError::Cancelled)),
        result = shared
            .flight
            .run(piece, shared.downloader.download_piece(piece)) => result,
    };
    let slot = match result {
        Ok(data) => Slot::Ready(data, permit),
        Err(err) => Slot::Failed(err, permit),
    };
    shared
        .slots
        .lock()
        .expect("fetcher lock poisoned")
        .insert(piece, slot);
    shared.ready.notify_waiters();
}
