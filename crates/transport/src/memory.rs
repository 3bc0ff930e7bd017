//! Loopback datagram substrate.
//!
//! Paired in-process sessions plus a static peer table: the development
//! backend for running without the overlay network, and the substrate the
//! transport tests drive.

use crate::error::{TransportError, TransportResult};
use crate::session::{
    AddressLookup, DatagramSession, DisconnectFn, PeerAddresses, PeerGateway, QueryHandler,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tonindex_core::Id32;

/// The initiator holds its peer strongly; the accepting end points back
/// weakly, so a dropped initiator tears the whole pair down.
enum PeerLink {
    Strong(Arc<MemorySession>),
    Weak(Weak<MemorySession>),
}

/// One end of an in-process session pair.
pub struct MemorySession {
    peer: OnceLock<PeerLink>,
    handler: Mutex<Option<Arc<dyn QueryHandler>>>,
    closed: AtomicBool,
    on_disconnect: Mutex<Vec<DisconnectFn>>,
}

impl MemorySession {
    fn unlinked() -> Arc<Self> {
        Arc::new(Self {
            peer: OnceLock::new(),
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            on_disconnect: Mutex::new(Vec::new()),
        })
    }

    /// Register a disconnect callback on this end.
    pub fn on_disconnect(&self, callback: DisconnectFn) {
        self.on_disconnect
            .lock()
            .expect("session lock poisoned")
            .push(callback);
    }

    fn peer(&self) -> Option<Arc<MemorySession>> {
        match self.peer.get()? {
            PeerLink::Strong(peer) => Some(peer.clone()),
            PeerLink::Weak(peer) => peer.upgrade(),
        }
    }

    fn fire_disconnect(&self) {
        let callbacks: Vec<_> = self
            .on_disconnect
            .lock()
            .expect("session lock poisoned")
            .drain(..)
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

/// Create two sessions wired back to back. The first end owns the pair.
pub fn session_pair() -> (Arc<MemorySession>, Arc<MemorySession>) {
    let initiator = MemorySession::unlinked();
    let acceptor = MemorySession::unlinked();
    initiator
        .peer
        .set(PeerLink::Strong(acceptor.clone()))
        .unwrap_or_else(|_| unreachable!("fresh session"));
    acceptor
        .peer
        .set(PeerLink::Weak(Arc::downgrade(&initiator)))
        .unwrap_or_else(|_| unreachable!("fresh session"));
    (initiator, acceptor)
}

#[async_trait]
impl DatagramSession for MemorySession {
    async fn query(&self, max_answer_size: u64, data: Bytes) -> TransportResult<Bytes> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let peer = self.peer().ok_or(TransportError::Disconnected)?;
        if peer.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let handler = peer
            .handler
            .lock()
            .expect("session lock poisoned")
            .clone()
            .ok_or(TransportError::NoHandler)?;

        let peer_session: Arc<dyn DatagramSession> = peer.clone();
        let answer = handler.handle_query(&peer_session, data).await?;
        if answer.len() as u64 > max_answer_size {
            return Err(TransportError::AnswerTooLarge {
                size: answer.len(),
                max: max_answer_size,
            });
        }
        Ok(answer)
    }

    fn set_query_handler(&self, handler: Arc<dyn QueryHandler>) {
        *self.handler.lock().expect("session lock poisoned") = Some(handler);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fire_disconnect();
        if let Some(peer) = self.peer() {
            if !peer.closed.swap(true, Ordering::SeqCst) {
                peer.fire_disconnect();
            }
        }
    }
}

#[derive(Default)]
struct NetworkInner {
    peers: Mutex<HashMap<Id32, Arc<dyn QueryHandler>>>,
    sessions: Mutex<Vec<(Id32, Weak<MemorySession>)>>,
}

/// A static peer table acting as both address lookup and gateway.
#[derive(Default, Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reachable peer under `key`.
    pub fn register(&self, key: Id32, handler: Arc<dyn QueryHandler>) {
        self.inner
            .peers
            .lock()
            .expect("network lock poisoned")
            .insert(key, handler);
    }

    /// Sever every session established to `key`.
    pub fn kill(&self, key: &Id32) {
        let sessions: Vec<_> = {
            let mut sessions = self
                .inner
                .sessions
                .lock()
                .expect("network lock poisoned");
            sessions.retain(|(_, weak)| weak.strong_count() > 0);
            sessions
                .iter()
                .filter(|(k, _)| k == key)
                .filter_map(|(_, weak)| weak.upgrade())
                .collect()
        };
        for session in sessions {
            session.close();
        }
    }
}

#[async_trait]
impl AddressLookup for MemoryNetwork {
    async fn find(&self, id: &Id32) -> TransportResult<PeerAddresses> {
        let known = self
            .inner
            .peers
            .lock()
            .expect("network lock poisoned")
            .contains_key(id);
        if !known {
            return Err(TransportError::Lookup(format!("peer {id} is not known")));
        }
        Ok(PeerAddresses {
            endpoints: vec![format!("mem://{id}")],
            key: *id,
        })
    }
}

#[async_trait]
impl PeerGateway for MemoryNetwork {
    async fn connect(
        &self,
        _endpoint: &str,
        key: &Id32,
        on_disconnect: DisconnectFn,
    ) -> TransportResult<Arc<dyn DatagramSession>> {
        let handler = self
            .inner
            .peers
            .lock()
            .expect("network lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("peer {key} is not reachable")))?;

        let (local, remote) = session_pair();
        remote.set_query_handler(handler);
        local.on_disconnect(on_disconnect);
        self.inner
            .sessions
            .lock()
            .expect("network lock poisoned")
            .push((*key, Arc::downgrade(&local)));
        Ok(local)
    }
}
