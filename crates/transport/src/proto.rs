//! Wire messages for HTTP over the datagram session.

use crate::error::{TransportError, TransportResult};
use crate::tl::{TlReader, TlWriter, scheme_id};
use bytes::Bytes;
use tonindex_core::Id32;

const HEADER_SCHEME: &str = "http.header name:string value:string = http.Header";
const REQUEST_SCHEME: &str = "http.request id:int256 method:string url:string http_version:string headers:(vector http.header) = http.Response";
const RESPONSE_SCHEME: &str = "http.response http_version:string status_code:int reason:string headers:(vector http.header) no_payload:Bool = http.Response";
const PAYLOAD_PART_SCHEME: &str =
    "http.payloadPart data:bytes trailer:(vector http.header) last:Bool = http.PayloadPart";
const GET_NEXT_PAYLOAD_PART_SCHEME: &str =
    "http.getNextPayloadPart id:int256 seqno:int max_chunk_size:int = http.PayloadPart";

/// One HTTP header on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An outbound HTTP request addressed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request id; an all-zero id is replaced with a random one on send.
    pub id: Id32,
    pub method: String,
    pub url: String,
    pub version: String,
    pub headers: Vec<HttpHeader>,
}

/// A peer's HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: i32,
    pub reason: String,
    pub headers: Vec<HttpHeader>,
    /// When set there is no payload to pull.
    pub no_payload: bool,
}

/// One chunk of a streamed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPart {
    pub data: Bytes,
    pub trailer: Vec<HttpHeader>,
    pub last: bool,
}

/// Pull of the next payload chunk for an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetNextPayloadPart {
    pub id: Id32,
    pub seqno: i32,
    pub max_chunk_size: i32,
}

/// A boxed wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(HttpRequest),
    Response(HttpResponse),
    PayloadPart(PayloadPart),
    GetNextPayloadPart(GetNextPayloadPart),
}

/// The registry of wire types: constructor ids computed once from the
/// scheme strings, owned by the transport rather than process-global.
#[derive(Debug, Clone)]
pub struct WireCodec {
    request: u32,
    response: u32,
    payload_part: u32,
    get_next_payload_part: u32,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    /// Register the five HTTP wire types.
    pub fn new() -> Self {
        // http.header has no boxed id of its own: it only appears bare
        // inside vectors, but registering keeps the scheme set complete
        let _ = scheme_id(HEADER_SCHEME);
        Self {
            request: scheme_id(REQUEST_SCHEME),
            response: scheme_id(RESPONSE_SCHEME),
            payload_part: scheme_id(PAYLOAD_PART_SCHEME),
            get_next_payload_part: scheme_id(GET_NEXT_PAYLOAD_PART_SCHEME),
        }
    }

    pub fn encode(&self, msg: &Message) -> Bytes {
        let mut w = TlWriter::new();
        match msg {
            Message::Request(req) => {
                w.write_u32(self.request);
                w.write_int256(req.id.as_bytes());
                w.write_string(&req.method);
                w.write_string(&req.url);
                w.write_string(&req.version);
                write_headers(&mut w, &req.headers);
            }
            Message::Response(resp) => {
                w.write_u32(self.response);
                w.write_string(&resp.version);
                w.write_i32(resp.status_code);
                w.write_string(&resp.reason);
                write_headers(&mut w, &resp.headers);
                w.write_bool(resp.no_payload);
            }
            Message::PayloadPart(part) => {
                w.write_u32(self.payload_part);
                w.write_bytes(&part.data);
                write_headers(&mut w, &part.trailer);
                w.write_bool(part.last);
            }
            Message::GetNextPayloadPart(pull) => {
                w.write_u32(self.get_next_payload_part);
                w.write_int256(pull.id.as_bytes());
                w.write_i32(pull.seqno);
                w.write_i32(pull.max_chunk_size);
            }
        }
        w.into_bytes()
    }

    pub fn decode(&self, data: &[u8]) -> TransportResult<Message> {
        let mut r = TlReader::new(data);
        let constructor = r.read_u32()?;
        let msg = if constructor == self.request {
            Message::Request(HttpRequest {
                id: Id32::new(r.read_int256()?),
                method: r.read_string()?,
                url: r.read_string()?,
                version: r.read_string()?,
                headers: read_headers(&mut r)?,
            })
        } else if constructor == self.response {
            Message::Response(HttpResponse {
                version: r.read_string()?,
                status_code: r.read_i32()?,
                reason: r.read_string()?,
                headers: read_headers(&mut r)?,
                no_payload: r.read_bool()?,
            })
        } else if constructor == self.payload_part {
            Message::PayloadPart(PayloadPart {
                data: Bytes::from(r.read_bytes()?),
                trailer: read_headers(&mut r)?,
                last: r.read_bool()?,
            })
        } else if constructor == self.get_next_payload_part {
            Message::GetNextPayloadPart(GetNextPayloadPart {
                id: Id32::new(r.read_int256()?),
                seqno: r.read_i32()?,
                max_chunk_size: r.read_i32()?,
            })
        } else {
            return Err(TransportError::UnknownConstructor(constructor));
        };

        if !r.is_empty() {
            return Err(TransportError::Codec("trailing bytes after message".into()));
        }
        Ok(msg)
    }
}

fn write_headers(w: &mut TlWriter, headers: &[HttpHeader]) {
    w.write_u32(headers.len() as u32);
    for header in headers {
        w.write_string(&header.name);
        w.write_string(&header.value);
    }
}

fn read_headers(r: &mut TlReader<'_>) -> TransportResult<Vec<HttpHeader>> {
    let count = r.read_u32()?;
    // each header costs at least eight bytes on the wire
    if count as usize > r.remaining_hint() / 8 + 1 {
        return Err(TransportError::Codec(format!(
            "implausible header count {count}"
        )));
    }
    let mut headers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        headers.push(HttpHeader {
            name: r.read_string()?,
            value: r.read_string()?,
        });
    }
    Ok(headers)
}
