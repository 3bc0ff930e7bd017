//! Outbound HTTP for the tonindex crawler.
//!
//! A retrying client with jittered exponential backoff, and the NFT
//! collection-listing client the crawler paginates through.

pub mod error;
pub mod retry;
pub mod toncenter;

pub use error::{IngestError, IngestResult};
pub use retry::RetryClient;
pub use toncenter::{Nft, NftContent, ToncenterClient};
