//! Toncenter NFT collection-listing client.

use crate::error::{IngestError, IngestResult};
use crate::retry::RetryClient;
use serde::Deserialize;

/// One listed NFT item.
#[derive(Debug, Clone, Deserialize)]
pub struct Nft {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub content: NftContent,
}

/// On-chain content of a domain NFT.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NftContent {
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Deserialize)]
struct GetNftsResponse {
    #[serde(default)]
    nft_items: Vec<Nft>,
}

/// Client for the toncenter v3 listing API.
#[derive(Debug, Clone)]
pub struct ToncenterClient {
    endpoint: String,
    api_key: String,
    client: RetryClient,
}

impl ToncenterClient {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self::with_client(endpoint, api_key, RetryClient::default())
    }

    pub fn with_client(endpoint: &str, api_key: &str, client: RetryClient) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        }
    }

    /// List one page of a collection's NFTs.
    pub async fn nfts_by_collection(
        &self,
        collection: &str,
        limit: u32,
        offset: u64,
    ) -> IngestResult<Vec<Nft>> {
        let url = format!("{}/v3/nft/items", self.endpoint);
        let mut builder = self.client.http().get(url).query(&[
            ("collection_address", collection.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]);
        if !self.api_key.is_empty() {
            builder = builder.header("X-Api-Key", &self.api_key);
        }

        let resp = self.client.execute(builder.build()?).await?;
        if !resp.status().is_success() {
            return Err(IngestError::Status(resp.status()));
        }
        let parsed: GetNftsResponse = resp.json().await?;
        Ok(parsed.nft_items)
    }
}
