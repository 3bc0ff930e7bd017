//! Seams to the datagram substrate.
//!
//! The substrate provides ordered, reliable query/response sessions over
//! UDP together with distributed address lookup; both are external
//! machinery reached through these traits.

use crate::error::TransportResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tonindex_core::Id32;

/// Callback fired once when a session dies.
pub type DisconnectFn = Box<dyn Fn() + Send + Sync>;

/// Answers inbound queries arriving on a session.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Handle one query and produce the encoded answer.
    async fn handle_query(
        &self,
        session: &Arc<dyn DatagramSession>,
        data: Bytes,
    ) -> TransportResult<Bytes>;
}

/// An established ordered-datagram session with one peer.
#[async_trait]
pub trait DatagramSession: Send + Sync {
    /// Issue a query and await its answer, bounded by `max_answer_size`.
    async fn query(&self, max_answer_size: u64, data: Bytes) -> TransportResult<Bytes>;

    /// Register the handler answering this session's inbound queries.
    fn set_query_handler(&self, handler: Arc<dyn QueryHandler>);

    /// Tear the session down; pending queries fail.
    fn close(&self);
}

/// Candidate endpoints for a peer, resolved from the distributed lookup.
#[derive(Debug, Clone)]
pub struct PeerAddresses {
    /// Dialable endpoints, in preference order.
    pub endpoints: Vec<String>,
    /// The peer's node public key.
    pub key: Id32,
}

/// Distributed address lookup keyed by 32-byte identifier.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn find(&self, id: &Id32) -> TransportResult<PeerAddresses>;
}

/// Dials datagram sessions to known endpoints.
#[async_trait]
pub trait PeerGateway: Send + Sync {
    /// Establish a session with `endpoint`, authenticated as `key`. The
    /// callback fires once when the session disconnects.
    async fn connect(
        &self,
        endpoint: &str,
        key: &Id32,
        on_disconnect: DisconnectFn,
    ) -> TransportResult<Arc<dyn DatagramSession>>;
}
