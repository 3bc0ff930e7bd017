//! Core domain types and shared logic for the tonindex gateway.
//!
//! This crate defines the canonical data model used across all other crates:
//! - 32-byte identifiers naming bags and peer node keys
//! - TON account and ADNL address codecs
//! - HTTP range parsing with the gateway's single-range semantics
//! - Keyset pagination cursors
//! - Gateway host namespaces
//! - Process configuration

pub mod address;
pub mod config;
pub mod cursor;
pub mod error;
pub mod id;
pub mod namespace;
pub mod range;

pub use address::{AccountAddress, format_adnl, parse_adnl};
pub use config::{Config, DomainSource};
pub use cursor::{Cursor, SortBy};
pub use error::{Error, Result};
pub use id::Id32;
pub use namespace::Namespaces;
pub use range::{ByteRange, parse_range};

/// Maximum chunk requested from a peer per payload part: 128 KiB.
pub const MAX_CHUNK_SIZE: usize = 128 << 10;

/// Answer budget for non-payload peer queries: 16 KiB.
pub const MAX_ANSWER_SIZE: u64 = 16 << 10;
