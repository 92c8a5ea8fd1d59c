use std::net::SocketAddr;

use bytes::Bytes;
use tracing::info;

use crate::answer::answer;
use crate::codec::{self, question_name};
use crate::config::Settings;
use crate::error::ProxyError;
use crate::overrides::{Classification, OverrideTable, classify};
use crate::upstream::UdpForwarder;

/// Per-datagram pipeline: decode, classify, then self-answer or forward.
/// Cheap to clone; every handling unit gets its own copy.
#[derive(Clone)]
pub struct Engine {
    overrides: OverrideTable,
    forwarder: UdpForwarder,
}

impl Engine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            overrides: settings.overrides.clone(),
            forwarder: UdpForwarder::new(&settings.upstream, settings.upstream_timeout),
        }
    }

    /// Produces the reply for one datagram. An `Err` means nothing must be
    /// sent back to the client.
    pub async fn handle_packet(&self, packet: &[u8], peer: SocketAddr) -> Result<Bytes, ProxyError> {
        let msg = codec::decode(packet)?;
        let query = msg.queries().first().ok_or(ProxyError::NoQuestion)?;
        let qname = question_name(query);
        let qtype = query.query_type();

        match classify(query, &self.overrides) {
            Classification::LocalMatch(addr) => {
                info!(event = "self_answer", qname = %qname, qtype = ?qtype, addr = %addr, client = %peer, "self-answering request");
                answer(msg, addr)
            }
            Classification::NoMatch => {
                info!(event = "forward", qname = %qname, qtype = ?qtype, upstream = %self.forwarder.upstream(), client = %peer, "forwarding request");
                self.forwarder.forward(packet).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, RecordType};
    use hickory_proto::serialize::binary::BinDecodable;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use tokio::net::UdpSocket;
    use tokio::sync::Mutex;

    fn query_bytes(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), qtype));
        msg.to_vec().unwrap()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn engine_for(upstream: &str) -> Engine {
        let raw = serde_json::json!({
            "bind": "127.0.0.1",
            "port": 5353,
            "dns": upstream,
            "upstream_timeout_ms": 500,
            "records": { "example.local": "10.0.0.5" }
        });
        let cfg: crate::config::ProxyConfig = serde_json::from_value(raw).expect("parse");
        Engine::new(&Settings::from_config(cfg).expect("settings"))
    }

    /// Upstream that records every query and echoes it back with QR set.
    async fn recording_upstream() -> (String, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                let Ok((n, from)) = sock.recv_from(&mut buf).await else { break };
                log.lock().await.push(buf[..n].to_vec());
                let mut reply = buf[..n].to_vec();
                reply[2] |= 0x80;
                let _ = sock.send_to(&reply, from).await;
            }
        });
        (addr, seen)
    }

    #[tokio::test]
    async fn override_a_query_is_answered_locally() {
        let (upstream, seen) = recording_upstream().await;
        let engine = engine_for(&upstream);

        let reply = engine
            .handle_packet(&query_bytes(0x4242, "example.local", RecordType::A), peer())
            .await
            .expect("reply");
        let msg = Message::from_bytes(&reply).unwrap();
        assert_eq!(msg.id(), 0x4242);
        assert_eq!(msg.message_type(), MessageType::Response);
        assert_eq!(msg.response_code(), ResponseCode::NoError);
        assert_eq!(msg.answer_count(), 1);
        assert_eq!(
            msg.answers()[0].data(),
            Some(&RData::A(A(Ipv4Addr::new(10, 0, 0, 5))))
        );
        assert!(seen.lock().await.is_empty(), "override must not reach upstream");
    }

    #[tokio::test]
    async fn override_aaaa_query_gets_empty_answer() {
        let (upstream, seen) = recording_upstream().await;
        let engine = engine_for(&upstream);

        let reply = engine
            .handle_packet(&query_bytes(1, "example.local", RecordType::AAAA), peer())
            .await
            .expect("reply");
        let msg = Message::from_bytes(&reply).unwrap();
        assert_eq!(msg.message_type(), MessageType::Response);
        assert!(msg.answers().is_empty());
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_names_and_non_address_types_are_forwarded_unmodified() {
        let (upstream, seen) = recording_upstream().await;
        let engine = engine_for(&upstream);

        let other = query_bytes(2, "other.local", RecordType::A);
        let mx = query_bytes(3, "example.local", RecordType::MX);
        let upper = query_bytes(4, "EXAMPLE.local", RecordType::A);

        for packet in [&other, &mx, &upper] {
            let reply = engine.handle_packet(packet, peer()).await.expect("relayed");
            let mut expected = packet.clone();
            expected[2] |= 0x80;
            assert_eq!(&reply[..], &expected[..]);
        }

        let seen = seen.lock().await;
        assert_eq!(seen.as_slice(), &[other, mx, upper]);
    }

    #[tokio::test]
    async fn malformed_datagram_is_a_parse_error() {
        let (upstream, seen) = recording_upstream().await;
        let engine = engine_for(&upstream);

        let err = engine
            .handle_packet(b"definitely not dns", peer())
            .await
            .expect_err("must fail");
        assert_eq!(err.stage(), "parse");
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn silent_upstream_yields_forward_error() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let engine = engine_for(&silent.local_addr().unwrap().to_string());

        let err = engine
            .handle_packet(&query_bytes(5, "other.local", RecordType::A), peer())
            .await
            .expect_err("no upstream reply");
        assert!(matches!(err, ProxyError::UpstreamTimeout(_)));
    }

    #[tokio::test]
    async fn repeated_override_replies_are_byte_identical() {
        let engine = engine_for("127.0.0.1:9");
        let packet = query_bytes(0x0909, "example.local", RecordType::A);
        let first = engine.handle_packet(&packet, peer()).await.unwrap();
        let second = engine.handle_packet(&packet, peer()).await.unwrap();
        assert_eq!(first, second);
    }
}
