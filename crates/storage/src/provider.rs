//! The bag provider: an in-memory cache of active bags with single-flight
//! admission and TTL eviction.

use crate::downloader::{BagConnector, BagInfo, FileInfo, PieceDownloader};
use crate::error::{SharedError, StorageError, StorageResult};
use crate::prefetch::PieceFetcher;
use crate::singleflight::Group;
use crate::unix_now;
use bytes::{Buf, Bytes};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonindex_core::Id32;

/// An active bag: metadata, its piece downloader, and the coalescing state
/// shared by concurrent readers.
pub struct Bag {
    id: Id32,
    info: BagInfo,
    downloader: Arc<dyn PieceDownloader>,
    /// Write-level coalescing: concurrent readers of the same piece share
    /// one wait.
    piece_flight: Group<u32, Bytes>,
    /// Download-level coalescing, shared by every fetcher on this bag.
    download_flight: Arc<Group<u32, Bytes>>,
    last_used: Arc<AtomicI64>,
}

impl Bag {
    fn new(
        id: Id32,
        info: BagInfo,
        downloader: Arc<dyn PieceDownloader>,
        last_used: Arc<AtomicI64>,
    ) -> Self {
        Self {
            id,
            info,
            downloader,
            piece_flight: Group::new(),
            download_flight: Arc::new(Group::new()),
            last_used,
        }
    }

    /// The bag identifier.
    pub fn id(&self) -> &Id32 {
        &self.id
    }

    /// The bag metadata.
    pub fn info(&self) -> &BagInfo {
        &self.info
    }

    /// Look up a file in the bag's index.
    pub fn file(&self, name: &str) -> Option<&FileInfo> {
        self.info.file(name)
    }

    fn touch(&self) {
        self.last_used.store(unix_now(), Ordering::Relaxed);
    }

    fn close(&self) {
        self.downloader.close();
    }

    /// Stream the inclusive byte range `[from, to]` of `file` into `w`,
    /// prefetching pieces with `workers` parallelism.
    ///
    /// Pieces are emitted in strictly ascending order. A fetch that failed
    /// because the downloader cancelled internally is retried as long as
    /// `cancel` has not fired; everything else aborts the call.
    pub async fn write_file_to<W>(
        &self,
        cancel: &CancellationToken,
        w: &mut W,
        file: &FileInfo,
        from: u64,
        to: u64,
        workers: usize,
    ) -> StorageResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let piece_size = self.info.piece_size;
        let from_offset = from + file.first_piece_offset;
        let from_piece = file.first_piece + (from_offset / piece_size) as u32;
        let to_offset = to + file.first_piece_offset;
        let to_piece = file.first_piece + (to_offset / piece_size) as u32;

        let fetcher = PieceFetcher::new(
            self.downloader.clone(),
            self.download_flight.clone(),
            from_piece..=to_piece,
            workers,
        );

        for piece in from_piece..=to_piece {
            let result = loop {
                self.touch();
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(SharedError::new(StorageError::Cancelled)),
                    result = self.piece_flight.run(piece, fetcher.wait_get(piece)) => result,
                };
                if let Err(err) = &result {
                    if matches!(**err, StorageError::DownloadCancelled) && !cancel.is_cancelled() {
                        // the cancellation came from inside the downloader
                        // while our caller is still alive
                        fetcher.refetch(piece);
                        continue;
                    }
                }
                fetcher.free(piece);
                break result;
            };
            let mut data = result.map_err(|err| StorageError::Piece(piece, err))?;

            if piece == to_piece {
                data.truncate((to_offset % piece_size) as usize + 1);
            }
            if piece == from_piece {
                let head = ((from_offset % piece_size) as usize).min(data.len());
                data.advance(head);
            }

            w.write_all(&data).await?;
            self.touch();
        }
        Ok(())
    }
}

struct BagEntry {
    ready: watch::Sender<bool>,
    result: Mutex<Option<Result<Arc<Bag>, SharedError>>>,
    last_used: Arc<AtomicI64>,
}

impl BagEntry {
    fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            ready,
            result: Mutex::new(None),
            last_used: Arc::new(AtomicI64::new(unix_now())),
        }
    }

    fn publish(&self, result: Result<Arc<Bag>, SharedError>) {
        *self.result.lock().expect("bag entry lock poisoned") = Some(result);
        self.ready.send_replace(true);
    }

    fn shared_result(&self) -> Result<Arc<Bag>, SharedError> {
        self.result
            .lock()
            .expect("bag entry lock poisoned")
            .clone()
            .expect("bag entry read before ready")
    }
}

struct ProviderInner {
    connector: Arc<dyn BagConnector>,
    ttl: Duration,
    bags: Mutex<HashMap<Id32, Arc<BagEntry>>>,
}

/// Cache of active bags keyed by identifier.
///
/// A given id has at most one live entry; concurrent admissions coalesce at
/// the entry's ready signal, and a background evictor closes entries whose
/// `last_used` has fallen behind the TTL. Eviction is optimistic: it may
/// close a downloader under an active reader, who surfaces the failure as
/// an upstream error and re-admits on the next request.
#[derive(Clone)]
pub struct BagProvider {
    inner: Arc<ProviderInner>,
    stop: CancellationToken,
}

impl BagProvider {
    pub fn new(connector: Arc<dyn BagConnector>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                connector,
                ttl,
                bags: Mutex::new(HashMap::new()),
            }),
            stop: CancellationToken::new(),
        }
    }

    /// Launch the background evictor; runs until [`BagProvider::close`].
    pub fn start(&self) {
        let inner = self.inner.clone();
        let stop = self.stop.clone();
        let interval = Duration::from_secs(60).min(self.inner.ttl / 2).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = ticker.tick() => inner.evict_stale(),
                }
            }
        });
    }

    /// Stop the evictor.
    pub fn close(&self) {
        self.stop.cancel();
    }

    /// Get the bag for `id`, admitting it on first use.
    ///
    /// Every waiter admitted before the ready signal observes either the
    /// fully initialized bag or the same admission error.
    pub async fn get_bag(&self, cancel: &CancellationToken, id: &Id32) -> StorageResult<Arc<Bag>> {
        let (entry, admitting) = {
            let mut bags = self.inner.bags.lock().expect("bag map lock poisoned");
            if let Some(entry) = bags.get(id) {
                entry.last_used.store(unix_now(), Ordering::Relaxed);
                (entry.clone(), false)
            } else {
                let entry = Arc::new(BagEntry::new());
                bags.insert(*id, entry.clone());
                (entry.clone(), true)
            }
        };

        if admitting {
            // Run the handshake on its own task so the entry is always
            // published even if this caller goes away mid-admission.
            let inner = self.inner.clone();
            let entry_for_task = entry.clone();
            let id = *id;
            tokio::spawn(async move {
                inner.admit(&id, &entry_for_task).await;
            });
        }

        let mut ready = entry.ready.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            changed = ready.wait_for(|ready| *ready) => {
                changed.map_err(|_| StorageError::Closed)?;
                entry
                    .shared_result()
                    .map_err(|err| StorageError::Admission(err.to_string()))
            }
        }
    }

    /// Number of live entries, including admissions still in flight.
    pub fn cached_bags(&self) -> usize {
        self.inner.bags.lock().expect("bag map lock poisoned").len()
    }

    /// Run one eviction sweep immediately.
    pub fn evict_now(&self) {
        self.inner.evict_stale();
    }
}

impl ProviderInner {
    async fn admit(&self, id: &Id32, entry: &Arc<BagEntry>) {
        match self.connector.open_bag(id).await {
            Ok((info, downloader)) => {
                let bag = Arc::new(Bag::new(*id, info, downloader, entry.last_used.clone()));
                entry.publish(Ok(bag));
            }
            Err(err) => {
                tracing::warn!(bag = %id, error = %err, "bag admission failed");
                self.bags
                    .lock()
                    .expect("bag map lock poisoned")
                    .remove(id);
                entry.publish(Err(SharedError::new(err)));
            }
        }
    }

    fn evict_stale(&self) {
        let deadline = unix_now() - self.ttl.as_secs() as i64;
        let mut closed = Vec::new();
        {
            let mut bags = self.bags.lock().expect("bag map lock poisoned");
            bags.retain(|id, entry| {
                if entry.last_used.load(Ordering::Relaxed) >= deadline {
                    return true;
                }
                match entry
                    .result
                    .lock()
                    .expect("bag entry lock poisoned")
                    .as_ref()
                {
                    Some(Ok(bag)) => {
                        closed.push((*id, bag.clone()));
                        false
                    }
                    // poisoned entries are removed at admission time
                    Some(Err(_)) => false,
                    // admission still in flight
                    None => true,
                }
            });
        }
        for (id, bag) in closed {
            tracing::debug!(bag = %id, "evicting idle bag");
            bag.close();
        }
    }
}
