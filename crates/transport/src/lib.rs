//! RLDP-style peer request/response transport with streaming payloads.
//!
//! Sits atop an ordered-datagram session that already provides reliability
//! and congestion control, and adds HTTP-semantic framing: requests and
//! responses as TL messages, with payloads pulled chunk by chunk through
//! `get_next_payload_part` queries in either direction. The substrate is
//! reached through the [`session`] seams; the [`memory`] module carries a
//! loopback substrate for development and tests.

pub mod connector;
pub mod error;
pub mod memory;
pub mod proto;
pub mod session;
pub mod tl;

pub use connector::{PayloadReader, RldpConnection, RldpConnector};
pub use error::{TransportError, TransportResult};
pub use proto::{
    GetNextPayloadPart, HttpHeader, HttpRequest, HttpResponse, Message, PayloadPart, WireCodec,
};
pub use session::{AddressLookup, DatagramSession, DisconnectFn, PeerAddresses, QueryHandler};
