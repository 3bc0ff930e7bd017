//! Peer transport behavior over the loopback substrate.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonindex_core::{Id32, MAX_ANSWER_SIZE, MAX_CHUNK_SIZE};
use tonindex_transport::memory::MemoryNetwork;
use tonindex_transport::{
    DatagramSession, GetNextPayloadPart, HttpHeader, HttpRequest, HttpResponse, Message,
    PayloadPart, QueryHandler, RldpConnector, TransportError, TransportResult, WireCodec,
};

/// A remote site: drains request bodies part by part, then serves a fixed
/// response body from its own request map.
struct FakeSite {
    codec: Arc<WireCodec>,
    response_body: Bytes,
    oversize_parts: bool,
    received: Mutex<Vec<u8>>,
    request_parts: AtomicUsize,
    bodies: Mutex<HashMap<Id32, usize>>,
}

impl FakeSite {
    fn new(codec: Arc<WireCodec>, response_body: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            codec,
            response_body: response_body.into(),
            oversize_parts: false,
            received: Mutex::new(Vec::new()),
            request_parts: AtomicUsize::new(0),
            bodies: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl QueryHandler for FakeSite {
    async fn handle_query(
        &self,
        session: &Arc<dyn DatagramSession>,
        data: Bytes,
    ) -> TransportResult<Bytes> {
        match self.codec.decode(&data)? {
            Message::Request(req) => {
                if req.method == "POST" {
                    let mut seqno = 0;
                    loop {
                        let pull = Message::GetNextPayloadPart(GetNextPayloadPart {
                            id: req.id,
                            seqno,
                            max_chunk_size: MAX_CHUNK_SIZE as i32,
                        });
                        let answer = session
                            .query(
                                MAX_ANSWER_SIZE + MAX_CHUNK_SIZE as u64,
                                self.codec.encode(&pull),
                            )
                            .await?;
                        let Message::PayloadPart(part) = self.codec.decode(&answer)? else {
                            return Err(TransportError::UnexpectedMessage("expected payload part"));
                        };
                        self.received
                            .lock()
                            .unwrap()
                            .extend_from_slice(&part.data);
                        self.request_parts.fetch_add(1, Ordering::SeqCst);
                        seqno += 1;
                        if part.last {
                            break;
                        }
                    }
                }

                let no_payload = self.response_body.is_empty();
                if !no_payload {
                    self.bodies.lock().unwrap().insert(req.id, 0);
                }
                Ok(self.codec.encode(&Message::Response(HttpResponse {
                    version: "HTTP/1.1".into(),
                    status_code: 200,
                    reason: "OK".into(),
                    headers: vec![HttpHeader::new("Content-Type", "text/html")],
                    no_payload,
                })))
            }
            Message::GetNextPayloadPart(pull) => {
                let mut bodies = self.bodies.lock().unwrap();
                let pos = bodies
                    .get_mut(&pull.id)
                    .ok_or_else(|| TransportError::UnknownRequest(pull.id.to_string()))?;
                let budget = if self.oversize_parts {
                    pull.max_chunk_size as usize + 1
                } else {
                    pull.max_chunk_size as usize
                };
                let end = (*pos + budget).min(self.response_body.len());
                let chunk = self.response_body.slice(*pos..end);
                *pos = end;
                let last = *pos >= self.response_body.len();
                if last {
                    bodies.remove(&pull.id);
                }
                Ok(self
                    .codec
                    .encode(&Message::PayloadPart(PayloadPart {
                        data: chunk,
                        trailer: Vec::new(),
                        last,
                    })))
            }
            _ => Err(TransportError::UnexpectedMessage("unsupported query")),
        }
    }
}

fn peer_key(byte: u8) -> Id32 {
    Id32::new([byte; 32])
}

fn connector_for(network: &MemoryNetwork, codec: &Arc<WireCodec>) -> RldpConnector {
    RldpConnector::new(
        Arc::new(network.clone()),
        Arc::new(network.clone()),
        codec.clone(),
    )
}

fn get_request(host: &str) -> HttpRequest {
    HttpRequest {
        id: Id32::new([0u8; 32]),
        method: "GET".into(),
        url: format!("http://{host}/"),
        version: "HTTP/1.1".into(),
        headers: vec![HttpHeader::new("Host", host)],
    }
}

#[tokio::test]
async fn request_body_streams_out_in_bounded_parts() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let key = peer_key(1);
    let site = FakeSite::new(codec.clone(), Bytes::from_static(b"ok"));
    network.register(key, site.clone());

    let connector = connector_for(&network, &codec);
    let conn = connector.get_connection(&key).await.unwrap();

    let body: Vec<u8> = (0..300 * 1024).map(|i| (i % 239) as u8).collect();
    let mut req = get_request("example.ton");
    req.method = "POST".into();
    let (resp, _reader) = conn
        .send_request(req, Some(Box::new(Cursor::new(body.clone()))))
        .await
        .unwrap();

    assert_eq!(resp.status_code, 200);
    // 300 KiB at a 128 KiB chunk budget: two full parts and a final short
    // one carrying the last flag
    assert_eq!(site.request_parts.load(Ordering::SeqCst), 3);
    assert_eq!(*site.received.lock().unwrap(), body);
}

#[tokio::test]
async fn response_payload_round_trips() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let key = peer_key(2);
    let body: Vec<u8> = (0..200_000).map(|i| (i % 241) as u8).collect();
    let site = FakeSite::new(codec.clone(), body.clone());
    network.register(key, site);

    let connector = connector_for(&network, &codec);
    let conn = connector.get_connection(&key).await.unwrap();
    let (resp, reader) = conn.send_request(get_request("example.ton"), None).await.unwrap();

    assert_eq!(resp.status_code, 200);
    assert!(!resp.no_payload);
    let mut reader = reader.unwrap();
    let mut got = Vec::new();
    while let Some(chunk) = reader.next_part(MAX_CHUNK_SIZE).await.unwrap() {
        got.extend_from_slice(&chunk);
    }
    assert_eq!(got, body);
}

#[tokio::test]
async fn empty_response_has_no_reader() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let key = peer_key(3);
    network.register(key, FakeSite::new(codec.clone(), Bytes::new()));

    let connector = connector_for(&network, &codec);
    let conn = connector.get_connection(&key).await.unwrap();
    let (resp, reader) = conn.send_request(get_request("example.ton"), None).await.unwrap();

    assert!(resp.no_payload);
    assert!(reader.is_none());
}

#[tokio::test]
async fn zero_length_request_body_sends_one_empty_last_part() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let key = peer_key(4);
    let site = FakeSite::new(codec.clone(), Bytes::from_static(b"ok"));
    network.register(key, site.clone());

    let connector = connector_for(&network, &codec);
    let conn = connector.get_connection(&key).await.unwrap();

    let mut req = get_request("example.ton");
    req.method = "POST".into();
    conn.send_request(req, Some(Box::new(Cursor::new(Vec::new()))))
        .await
        .unwrap();

    assert_eq!(site.request_parts.load(Ordering::SeqCst), 1);
    assert!(site.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_parts_fail_the_read() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let key = peer_key(5);
    let mut site = FakeSite::new(codec.clone(), vec![1u8; 64]);
    Arc::get_mut(&mut site).unwrap().oversize_parts = true;
    network.register(key, site);

    let connector = connector_for(&network, &codec);
    let conn = connector.get_connection(&key).await.unwrap();
    let (_, reader) = conn.send_request(get_request("example.ton"), None).await.unwrap();

    let err = reader.unwrap().next_part(32).await.unwrap_err();
    assert!(matches!(err, TransportError::OversizedChunk { .. }), "got {err}");
}

#[tokio::test]
async fn connections_are_shared_per_key() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let key = peer_key(6);
    network.register(key, FakeSite::new(codec.clone(), Bytes::from_static(b"ok")));

    let connector = connector_for(&network, &codec);
    let a = connector.get_connection(&key).await.unwrap();
    let b = connector.get_connection(&key).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(connector.live_connections().await, 1);
}

#[tokio::test]
async fn disconnect_removes_the_session_and_redial_works() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let key = peer_key(7);
    network.register(key, FakeSite::new(codec.clone(), Bytes::from_static(b"ok")));

    let connector = connector_for(&network, &codec);
    let conn = connector.get_connection(&key).await.unwrap();

    network.kill(&key);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.live_connections().await, 0);

    let err = conn.send_request(get_request("example.ton"), None).await.unwrap_err();
    assert!(matches!(err, TransportError::Disconnected), "got {err}");

    // a fresh call dials a new session
    let conn = connector.get_connection(&key).await.unwrap();
    let (resp, _) = conn.send_request(get_request("example.ton"), None).await.unwrap();
    assert_eq!(resp.status_code, 200);
}

#[tokio::test]
async fn unknown_peer_fails_lookup() {
    let codec = Arc::new(WireCodec::new());
    let network = MemoryNetwork::new();
    let connector = connector_for(&network, &codec);

    let err = connector.get_connection(&peer_key(8)).await.unwrap_err();
    assert!(matches!(err, TransportError::Lookup(_)), "got {err}");
}
