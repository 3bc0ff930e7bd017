//! Bag provider behavior against the in-memory seeder.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonindex_core::Id32;
use tonindex_storage::memory::{MemoryBagBuilder, MemoryBagConnector};
use tonindex_storage::{BagProvider, StorageError};

fn bag_id(byte: u8) -> Id32 {
    Id32::new([byte; 32])
}

fn blob(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn provider_with(connector: &MemoryBagConnector, ttl: Duration) -> BagProvider {
    BagProvider::new(std::sync::Arc::new(connector.clone()), ttl)
}

async fn read_range(
    provider: &BagProvider,
    id: &Id32,
    name: &str,
    from: u64,
    to: u64,
    workers: usize,
) -> Vec<u8> {
    let cancel = CancellationToken::new();
    let bag = provider.get_bag(&cancel, id).await.unwrap();
    let file = bag.file(name).unwrap().clone();
    let mut out = Vec::new();
    bag.write_file_to(&cancel, &mut out, &file, from, to, workers)
        .await
        .unwrap();
    out
}

#[tokio::test]
async fn concurrent_admissions_coalesce() {
    let connector = MemoryBagConnector::new();
    let id = bag_id(1);
    connector.seed(id, MemoryBagBuilder::new(64).file("index.html", b"hello"));
    let provider = provider_with(&connector, Duration::from_secs(60));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let provider = provider.clone();
        tasks.push(tokio::spawn(async move {
            provider.get_bag(&CancellationToken::new(), &id).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(connector.opens(), 1);
    assert_eq!(provider.cached_bags(), 1);
}

#[tokio::test]
async fn admission_failure_is_shared_and_retryable() {
    let connector = MemoryBagConnector::new();
    let id = bag_id(2);
    let provider = provider_with(&connector, Duration::from_secs(60));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let provider = provider.clone();
        tasks.push(tokio::spawn(async move {
            provider.get_bag(&CancellationToken::new(), &id).await
        }));
    }
    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, StorageError::Admission(_)), "got {err}");
    }

    // the failed entry is gone; a later call after seeding succeeds
    connector.seed(id, MemoryBagBuilder::new(64).file("index.html", b"hi"));
    provider
        .get_bag(&CancellationToken::new(), &id)
        .await
        .unwrap();
}

#[tokio::test]
async fn write_file_to_is_byte_exact() {
    let connector = MemoryBagConnector::new();
    let id = bag_id(3);
    let data = blob(1000);
    connector.seed(
        id,
        MemoryBagBuilder::new(64)
            .file("pad.bin", blob(37))
            .file("blob.bin", &data),
    );
    let provider = provider_with(&connector, Duration::from_secs(60));

    // subranges crossing piece boundaries both ways, plus the degenerate
    // single-piece and full-file cases
    for (from, to) in [
        (0u64, 999u64),
        (0, 0),
        (999, 999),
        (100, 199),
        (63, 64),
        (64, 127),
        (1, 998),
        (500, 500),
    ] {
        let got = read_range(&provider, &id, "blob.bin", from, to, 4).await;
        assert_eq!(
            got,
            &data[from as usize..=to as usize],
            "range {from}-{to} mismatch"
        );
    }
}

#[tokio::test]
async fn concurrent_writers_fetch_each_piece_once() {
    let connector = MemoryBagConnector::new();
    let id = bag_id(4);
    let data = blob(4096);
    connector.seed(id, MemoryBagBuilder::new(256).file("blob.bin", &data));
    connector.set_piece_delay(Duration::from_millis(5));
    let provider = provider_with(&connector, Duration::from_secs(60));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let provider = provider.clone();
        let expected = data.clone();
        tasks.push(tokio::spawn(async move {
            let got = read_range(&provider, &id, "blob.bin", 0, 4095, 4).await;
            assert_eq!(got, expected);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // 16 pieces, 4 concurrent full reads: no piece is ever downloaded
    // twice at the same time
    assert_eq!(connector.concurrent_duplicates(), 0);
    assert!(connector.fetches() >= 16);
}

#[tokio::test]
async fn internal_cancellation_is_masked_by_retry() {
    let connector = MemoryBagConnector::new();
    let id = bag_id(5);
    let data = blob(300);
    connector.seed(id, MemoryBagBuilder::new(64).file("blob.bin", &data));
    connector.cancel_once(id, 2);
    let provider = provider_with(&connector, Duration::from_secs(60));

    let got = read_range(&provider, &id, "blob.bin", 0, 299, 2).await;
    assert_eq!(got, data);
}

#[tokio::test]
async fn caller_cancellation_aborts_the_wait() {
    let connector = MemoryBagConnector::new();
    let id = bag_id(6);
    connector.seed(id, MemoryBagBuilder::new(64).file("blob.bin", blob(64)));
    connector.set_piece_delay(Duration::from_secs(30));
    let provider = provider_with(&connector, Duration::from_secs(60));

    let cancel = CancellationToken::new();
    let bag = provider.get_bag(&cancel, &id).await.unwrap();
    let file = bag.file("blob.bin").unwrap().clone();

    let writer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut out = Vec::new();
            bag.write_file_to(&cancel, &mut out, &file, 0, 63, 1).await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = writer.await.unwrap().unwrap_err();
    assert!(matches!(err, StorageError::Piece(_, _)), "got {err}");
}

#[tokio::test]
async fn eviction_closes_idle_bags() {
    let connector = MemoryBagConnector::new();
    let id = bag_id(7);
    connector.seed(id, MemoryBagBuilder::new(64).file("blob.bin", blob(64)));
    let provider = provider_with(&connector, Duration::from_secs(1));

    let cancel = CancellationToken::new();
    let bag = provider.get_bag(&cancel, &id).await.unwrap();
    // last-used has whole-second granularity; overshoot the TTL safely
    tokio::time::sleep(Duration::from_millis(2100)).await;
    provider.evict_now();
    assert_eq!(provider.cached_bags(), 0);

    // a reader racing the eviction sees an upstream error, not a hang
    let file = bag.file("blob.bin").unwrap().clone();
    let mut out = Vec::new();
    let err = bag
        .write_file_to(&cancel, &mut out, &file, 0, 63, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Piece(_, _)), "got {err}");

    // the next request re-admits
    provider.get_bag(&cancel, &id).await.unwrap();
    assert_eq!(connector.opens(), 2);
}
