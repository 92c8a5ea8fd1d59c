use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::timeout;
use tracing::debug;

use crate::codec::MAX_UDP_PAYLOAD;
use crate::error::{ProxyError, UpstreamStage};

/// Relays raw queries to one upstream resolver, one fresh socket per request.
#[derive(Debug, Clone)]
pub struct UdpForwarder {
    upstream: Arc<str>,
    timeout: Duration,
}

impl UdpForwarder {
    /// `timeout` of zero waits for the upstream indefinitely.
    pub fn new(upstream: &str, timeout: Duration) -> Self {
        Self {
            upstream: Arc::from(upstream),
            timeout,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Sends `packet` unmodified and returns the upstream's reply verbatim.
    /// The socket is closed when this returns, whatever the outcome.
    pub async fn forward(&self, packet: &[u8]) -> Result<Bytes, ProxyError> {
        let start = Instant::now();
        let res = if self.timeout.is_zero() {
            self.round_trip(packet).await
        } else {
            match timeout(self.timeout, self.round_trip(packet)).await {
                Ok(res) => res,
                Err(_) => Err(ProxyError::UpstreamTimeout(self.timeout)),
            }
        };
        if res.is_ok() {
            debug!(upstream = %self.upstream, upstream_ns = start.elapsed().as_nanos() as u64, "upstream call latency");
        }
        res
    }

    async fn round_trip(&self, packet: &[u8]) -> Result<Bytes, ProxyError> {
        let addr = lookup_host(self.upstream.as_ref())
            .await
            .map_err(|e| ProxyError::upstream(UpstreamStage::Resolve, e))?
            .next()
            .ok_or_else(|| {
                ProxyError::upstream(
                    UpstreamStage::Resolve,
                    io::Error::new(io::ErrorKind::NotFound, "upstream resolved to no address"),
                )
            })?;

        let sock = open_socket(addr).map_err(|e| ProxyError::upstream(UpstreamStage::Connect, e))?;
        sock.connect(addr)
            .await
            .map_err(|e| ProxyError::upstream(UpstreamStage::Connect, e))?;
        sock.send(packet)
            .await
            .map_err(|e| ProxyError::upstream(UpstreamStage::Send, e))?;

        let mut buf = [0u8; MAX_UDP_PAYLOAD];
        loop {
            let size = sock
                .recv(&mut buf)
                .await
                .map_err(|e| ProxyError::upstream(UpstreamStage::Receive, e))?;
            // Connected socket: only the upstream can reach us, but a late reply
            // to an earlier query on a recycled port still has to be skipped.
            if size >= 2 && packet.len() >= 2 && buf[..2] != packet[..2] {
                debug!(upstream = %addr, "discarding upstream reply with foreign transaction id");
                continue;
            }
            return Ok(Bytes::copy_from_slice(&buf[..size]));
        }
    }
}

fn open_socket(upstream: SocketAddr) -> io::Result<UdpSocket> {
    let (domain, local) = if upstream.is_ipv4() {
        (Domain::IPV4, IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    } else {
        (Domain::IPV6, IpAddr::V6(Ipv6Addr::UNSPECIFIED))
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&SocketAddr::new(local, 0).into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}
