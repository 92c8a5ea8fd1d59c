//! Wire codec for DNS over UDP.
//!
//! Decoding is a full `hickory-proto` parse of the datagram. Forwarded queries
//! never go back through `encode`; they are relayed as the bytes received.

use bytes::Bytes;
use hickory_proto::op::{Message, Query};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable, BinEncoder};

use crate::error::ProxyError;

/// Largest datagram read from clients or upstreams.
pub const MAX_UDP_PAYLOAD: usize = 4096;

/// Parses a datagram. A message without any question is rejected.
pub fn decode(packet: &[u8]) -> Result<Message, ProxyError> {
    let msg = Message::from_bytes(packet).map_err(ProxyError::Parse)?;
    if msg.queries().is_empty() {
        return Err(ProxyError::NoQuestion);
    }
    Ok(msg)
}

pub fn encode(msg: &Message) -> Result<Bytes, ProxyError> {
    let mut out = Vec::with_capacity(512);
    {
        let mut encoder = BinEncoder::new(&mut out);
        msg.emit(&mut encoder).map_err(ProxyError::Encode)?;
    }
    Ok(Bytes::from(out))
}

/// Raw question name bytes as they appeared on the wire: labels joined by
/// `.`, original case, no trailing root dot. Used as the override lookup key.
pub fn question_key(query: &Query) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    for (i, label) in query.name().iter().enumerate() {
        if i > 0 {
            out.push(b'.');
        }
        out.extend_from_slice(label);
    }
    out
}

/// Printable form of [`question_key`] for logs.
pub fn question_name(query: &Query) -> String {
    String::from_utf8_lossy(&question_key(query)).into_owned()
}
