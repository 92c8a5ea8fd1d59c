use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use hickory_proto::op::Query;
use hickory_proto::rr::RecordType;
use ipnet::IpNet;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::codec::question_key;

/// Name -> address overrides. Keys are compared byte for byte against the
/// question name as received (no case folding, no trailing dot).
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: Arc<FxHashMap<Box<[u8]>, IpAddr>>,
}

impl OverrideTable {
    pub fn from_records(records: HashMap<String, String>) -> anyhow::Result<Self> {
        let mut entries = FxHashMap::default();
        entries.reserve(records.len());
        for (name, value) in records {
            let addr = parse_override(&value)
                .with_context(|| format!("record {name}: invalid address {value:?}"))?;
            entries.insert(name.into_bytes().into_boxed_slice(), addr);
        }
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    #[inline]
    pub fn get(&self, name: &[u8]) -> Option<IpAddr> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accepts `addr` or `addr/prefix`. Only the address component is kept.
fn parse_override(value: &str) -> anyhow::Result<IpAddr> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<IpAddr>() {
        return Ok(addr);
    }
    let net: IpNet = value.parse()?;
    if net.prefix_len() != net.max_prefix_len() {
        warn!(target = "config", value = %value, addr = %net.addr(), "override given as a range, only its address is used");
    }
    Ok(net.addr())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Known name asking for an address record; answer locally with this address.
    LocalMatch(IpAddr),
    NoMatch,
}

pub fn classify(query: &Query, table: &OverrideTable) -> Classification {
    if !matches!(query.query_type(), RecordType::A | RecordType::AAAA) {
        return Classification::NoMatch;
    }
    match table.get(&question_key(query)) {
        Some(addr) => Classification::LocalMatch(addr),
        None => Classification::NoMatch,
    }
}
