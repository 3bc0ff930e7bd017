//! The crawler: paginated domain ingest with durable offsets.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonindex_core::{AccountAddress, DomainSource};
use tonindex_ingest::ToncenterClient;
use tonindex_metadata::{MetadataResult, MetadataStore, SiteCreate};

/// Items fetched per listing page.
const PAGE_LIMIT: u32 = 500;

/// Sleep when a source has nothing new.
const NO_NEW_DELAY: Duration = Duration::from_secs(10);

/// Discovers domains by walking NFT collection listings. Every error is
/// logged and retried; a poison item never stops a source.
pub struct Crawler {
    store: Arc<dyn MetadataStore>,
    toncenter: ToncenterClient,
}

impl Crawler {
    pub fn new(store: Arc<dyn MetadataStore>, toncenter: ToncenterClient) -> Arc<Self> {
        Arc::new(Self { store, toncenter })
    }

    /// Load each source's persisted offset and launch its worker. A
    /// failure to load an offset is fatal; losing it would re-crawl from
    /// zero forever.
    pub async fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
        sources: Vec<DomainSource>,
    ) -> MetadataResult<()> {
        for source in sources {
            let offset = self.store.get_offset(&source.address.raw()).await?;
            let crawler = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                crawler.worker(cancel, source, offset.max(0) as u64).await;
            });
        }
        Ok(())
    }

    async fn worker(&self, cancel: CancellationToken, source: DomainSource, mut offset: u64) {
        let source_addr = source.address.raw();
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let nfts = match self
                .toncenter
                .nfts_by_collection(&source_addr, PAGE_LIMIT, offset)
                .await
            {
                Ok(nfts) => nfts,
                Err(err) => {
                    tracing::debug!(source = %source_addr, error = %err, "listing fetch failed");
                    continue;
                }
            };
            if nfts.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(NO_NEW_DELAY) => continue,
                }
            }

            let mut sites = Vec::with_capacity(nfts.len());
            for nft in &nfts {
                let domain = nft.content.domain.clone();
                if domain.is_empty() {
                    tracing::warn!(nft = %nft.address, "nft is missing a domain");
                    continue;
                }
                let address = match AccountAddress::parse(&nft.address) {
                    Ok(address) => address,
                    Err(err) => {
                        tracing::warn!(nft = %nft.address, error = %err, "unable to parse address");
                        continue;
                    }
                };
                let (unicode, valid) = idna::domain_to_unicode(&domain);
                let unicode = if valid.is_err() {
                    tracing::warn!(domain = %domain, "unable to convert to unicode form");
                    domain.clone()
                } else {
                    unicode
                };
                sites.push(SiteCreate {
                    domain,
                    unicode,
                    zone: source.zone.clone(),
                    address: address.raw(),
                });
            }

            if let Err(err) = self.store.add_domains(&sites).await {
                tracing::warn!(source = %source_addr, error = %err, "unable to register domains");
                continue;
            }
            let next_offset = offset + nfts.len() as u64;
            if let Err(err) = self.store.set_offset(&source_addr, next_offset as i64).await {
                tracing::warn!(source = %source_addr, error = %err, "unable to save offset");
                continue;
            }
            offset = next_offset;
        }
    }
}
