use std::fmt;
use std::io;
use std::time::Duration;

use hickory_proto::error::ProtoError;
use thiserror::Error;

/// Upstream round-trip step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStage {
    Resolve,
    Connect,
    Send,
    Receive,
}

impl fmt::Display for UpstreamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpstreamStage::Resolve => "resolve",
            UpstreamStage::Connect => "connect",
            UpstreamStage::Send => "send",
            UpstreamStage::Receive => "receive",
        };
        f.write_str(s)
    }
}

/// Per-request failure. Every variant ends with the datagram being dropped.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("parse request: {0}")]
    Parse(#[source] ProtoError),

    #[error("request carries no question")]
    NoQuestion,

    #[error("encode response: {0}")]
    Encode(#[source] ProtoError),

    #[error("upstream {stage} failed: {source}")]
    Upstream {
        stage: UpstreamStage,
        #[source]
        source: io::Error,
    },

    #[error("upstream did not answer within {0:?}")]
    UpstreamTimeout(Duration),
}

impl ProxyError {
    pub(crate) fn upstream(stage: UpstreamStage, source: io::Error) -> Self {
        ProxyError::Upstream { stage, source }
    }

    /// Pipeline stage the error belongs to, for log correlation.
    pub fn stage(&self) -> &'static str {
        match self {
            ProxyError::Parse(_) | ProxyError::NoQuestion => "parse",
            ProxyError::Encode(_) => "encode",
            ProxyError::Upstream { .. } | ProxyError::UpstreamTimeout(_) => "forward",
        }
    }
}
