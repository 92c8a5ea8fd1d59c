use std::net::IpAddr;

use bytes::Bytes;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};

use crate::codec;
use crate::error::ProxyError;

/// TTL on synthesized records; overrides are not meant to be cached downstream.
const OVERRIDE_TTL: u32 = 0;

/// Turns the inbound query into its local reply and encodes it.
///
/// ID, question and any extra sections are reused as received. An address
/// record is added only when the override's family fits the question type,
/// so an AAAA question against an IPv4 override gets NOERROR with no answers.
pub fn answer(mut msg: Message, addr: IpAddr) -> Result<Bytes, ProxyError> {
    let query = msg.queries().first().cloned().ok_or(ProxyError::NoQuestion)?;

    msg.take_answers();
    msg.set_response_code(ResponseCode::NoError);

    if let Some(rdata) = address_rdata(query.query_type(), addr) {
        let mut record = Record::from_rdata(query.name().clone(), OVERRIDE_TTL, rdata);
        record.set_dns_class(query.query_class());
        msg.add_answer(record);
    }

    msg.set_message_type(MessageType::Response)
        .set_recursion_available(true)
        .set_op_code(OpCode::Query);

    codec::encode(&msg)
}

fn address_rdata(qtype: RecordType, addr: IpAddr) -> Option<RData> {
    match (qtype, addr) {
        (RecordType::A, IpAddr::V4(v4)) => Some(RData::A(A(v4))),
        (RecordType::AAAA, IpAddr::V6(v6)) => Some(RData::AAAA(AAAA(v6))),
        _ => None,
    }
}
