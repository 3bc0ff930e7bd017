//! Sites and crawler-state store for the tonindex gateway.
//!
//! The control-plane data model:
//! - Site records: status, storage flag, spam flag, check lease
//! - Crawler offsets per domain source
//!
//! Backed by PostgreSQL through sqlx; the reservation lease leans on
//! `FOR UPDATE SKIP LOCKED` and the listing on keyset pagination.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{ListFilters, SiteCreate, SiteRow, SiteStatus, Stats};
pub use postgres::PostgresStore;
pub use repos::{CrawlerStateRepo, SitesRepo};
pub use store::MetadataStore;

/// Connect to the store and run schema bootstrap.
pub async fn connect(database_url: &str) -> MetadataResult<PostgresStore> {
    let store = PostgresStore::connect(database_url).await?;
    store.migrate().await?;
    Ok(store)
}
