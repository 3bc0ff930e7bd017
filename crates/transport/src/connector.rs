//! Peer connector and per-peer request/response sessions.

use crate::error::{TransportError, TransportResult};
use crate::proto::{GetNextPayloadPart, HttpRequest, HttpResponse, Message, PayloadPart, WireCodec};
use crate::session::{AddressLookup, DatagramSession, DisconnectFn, PeerGateway, QueryHandler};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, RwLock};
use tonindex_core::{Id32, MAX_ANSWER_SIZE, MAX_CHUNK_SIZE};

/// A pull-driven source for an outbound request body.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

struct ConnectorInner {
    gateway: Arc<dyn PeerGateway>,
    lookup: Arc<dyn AddressLookup>,
    codec: Arc<WireCodec>,
    conns: RwLock<HashMap<Id32, Arc<RldpConnection>>>,
}

impl ConnectorInner {
    async fn remove(&self, key: &Id32) {
        let conn = self.conns.write().await.remove(key);
        if let Some(conn) = conn {
            conn.close().await;
        }
    }
}

/// Keeps at most one live session per remote node key, establishing them
/// on demand from distributed address lookup.
#[derive(Clone)]
pub struct RldpConnector {
    inner: Arc<ConnectorInner>,
}

impl RldpConnector {
    pub fn new(
        gateway: Arc<dyn PeerGateway>,
        lookup: Arc<dyn AddressLookup>,
        codec: Arc<WireCodec>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                gateway,
                lookup,
                codec,
                conns: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get the session for `id`, dialing one if none is live.
    ///
    /// Concurrent calls for the same key resolve to the same session;
    /// admission is serialized under the write lock. A disconnected
    /// session removes itself, so the next call dials fresh.
    pub async fn get_connection(&self, id: &Id32) -> TransportResult<Arc<RldpConnection>> {
        let addrs = self
            .inner
            .lookup
            .find(id)
            .await
            .map_err(|e| TransportError::Lookup(format!("unable to find address of {id}: {e}")))?;
        if addrs.endpoints.is_empty() {
            return Err(TransportError::Connect(format!(
                "no addresses found for {id}"
            )));
        }
        let key = addrs.key;

        if let Some(conn) = self.inner.conns.read().await.get(&key) {
            return Ok(conn.clone());
        }

        let mut conns = self.inner.conns.write().await;
        if let Some(conn) = conns.get(&key) {
            return Ok(conn.clone());
        }

        for endpoint in &addrs.endpoints {
            // the callback holds the connector weakly: it identifies us and
            // the key, never the session, so disconnect cannot cycle
            let weak = Arc::downgrade(&self.inner);
            let on_disconnect: DisconnectFn = Box::new(move || {
                let weak = weak.clone();
                tokio::spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.remove(&key).await;
                    }
                });
            });
            match self.inner.gateway.connect(endpoint, &key, on_disconnect).await {
                Ok(session) => {
                    let conn = RldpConnection::new(session, self.inner.codec.clone());
                    conns.insert(key, conn.clone());
                    return Ok(conn);
                }
                Err(err) => {
                    tracing::debug!(endpoint = %endpoint, peer = %key, error = %err, "dial failed");
                }
            }
        }
        Err(TransportError::Connect(format!("unable to connect to {id}")))
    }

    /// Number of live sessions.
    pub async fn live_connections(&self) -> usize {
        self.inner.conns.read().await.len()
    }
}

/// One request/response session with a peer, carrying the map of in-flight
/// outbound request bodies the remote pulls from.
pub struct RldpConnection {
    session: Arc<dyn DatagramSession>,
    codec: Arc<WireCodec>,
    requests: Mutex<HashMap<Id32, BodyReader>>,
}

impl RldpConnection {
    pub fn new(session: Arc<dyn DatagramSession>, codec: Arc<WireCodec>) -> Arc<Self> {
        let conn = Arc::new(Self {
            session,
            codec,
            requests: Mutex::new(HashMap::new()),
        });
        conn.session.set_query_handler(conn.clone());
        conn
    }

    /// Send an HTTP request, optionally with a streamed body, and return
    /// the response together with its payload reader when one exists.
    pub async fn send_request(
        &self,
        mut req: HttpRequest,
        body: Option<BodyReader>,
    ) -> TransportResult<(HttpResponse, Option<PayloadReader>)> {
        if req.id.as_bytes() == &[0u8; 32] {
            let mut id = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut id);
            req.id = Id32::new(id);
        }
        let id = req.id;

        let registered = body.is_some();
        if let Some(body) = body {
            self.requests.lock().await.insert(id, body);
        }

        let query = self.codec.encode(&Message::Request(req));
        let result = self.session.query(MAX_ANSWER_SIZE, query).await;
        if registered {
            // the remote is expected to pull the whole body before it
            // answers; removing here is the safety net when it does not
            self.requests.lock().await.remove(&id);
        }

        let resp = match self.codec.decode(&result?)? {
            Message::Response(resp) => resp,
            _ => return Err(TransportError::UnexpectedMessage("expected http.response")),
        };
        if resp.no_payload {
            return Ok((resp, None));
        }
        let reader = PayloadReader {
            session: self.session.clone(),
            codec: self.codec.clone(),
            id,
            seqno: 0,
            last: false,
        };
        Ok((resp, Some(reader)))
    }

    /// Tear the session down and drop every in-flight request body.
    pub async fn close(&self) {
        self.requests.lock().await.clear();
        self.session.close();
    }
}

#[async_trait]
impl QueryHandler for RldpConnection {
    async fn handle_query(
        &self,
        _session: &Arc<dyn DatagramSession>,
        data: Bytes,
    ) -> TransportResult<Bytes> {
        let pull = match self.codec.decode(&data)? {
            Message::GetNextPayloadPart(pull) => pull,
            _ => {
                return Err(TransportError::UnexpectedMessage(
                    "only http.getNextPayloadPart is served",
                ));
            }
        };
        if pull.max_chunk_size <= 0 {
            return Err(TransportError::InvalidChunkSize(pull.max_chunk_size));
        }
        let budget = (pull.max_chunk_size as usize).min(MAX_CHUNK_SIZE);

        let mut requests = self.requests.lock().await;
        let reader = requests
            .get_mut(&pull.id)
            .ok_or_else(|| TransportError::UnknownRequest(pull.id.to_string()))?;

        let mut buf = vec![0u8; budget];
        let mut filled = 0;
        let mut last = false;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                last = true;
                break;
            }
            filled += n;
        }
        if last {
            requests.remove(&pull.id);
        }
        buf.truncate(filled);

        let part = PayloadPart {
            data: Bytes::from(buf),
            trailer: Vec::new(),
            last,
        };
        Ok(self.codec.encode(&Message::PayloadPart(part)))
    }
}

/// Pulls a response payload chunk by chunk with incrementing seqnos.
pub struct PayloadReader {
    session: Arc<dyn DatagramSession>,
    codec: Arc<WireCodec>,
    id: Id32,
    seqno: i32,
    last: bool,
}

impl PayloadReader {
    /// Pull the next chunk, at most `min(max_chunk, 128 KiB)` bytes.
    /// Returns `None` once the final part has been consumed. A failed pull
    /// leaves the reader unusable.
    pub async fn next_part(&mut self, max_chunk: usize) -> TransportResult<Option<Bytes>> {
        if self.last {
            return Ok(None);
        }
        let budget = max_chunk.clamp(1, MAX_CHUNK_SIZE);
        let pull = Message::GetNextPayloadPart(GetNextPayloadPart {
            id: self.id,
            seqno: self.seqno,
            max_chunk_size: budget as i32,
        });
        let answer = self
            .session
            .query(MAX_ANSWER_SIZE + budget as u64, self.codec.encode(&pull))
            .await?;
        let part = match self.codec.decode(&answer)? {
            Message::PayloadPart(part) => part,
            _ => {
                return Err(TransportError::UnexpectedMessage(
                    "expected http.payloadPart",
                ));
            }
        };
        if part.data.len() > budget {
            // a peer overrunning the chunk budget is faulty
            return Err(TransportError::OversizedChunk {
                got: part.data.len(),
                max: budget,
            });
        }
        self.seqno += 1;
        if part.last {
            self.last = true;
        }
        Ok(Some(part.data))
    }

    /// Drain the remaining payload as a byte stream.
    pub fn into_stream(self) -> impl Stream<Item = TransportResult<Bytes>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            match reader.next_part(MAX_CHUNK_SIZE).await? {
                Some(data) => Ok(Some((data, reader))),
                None => Ok(None),
            }
        })
    }
}
