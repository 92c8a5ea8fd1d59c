use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::codec::MAX_UDP_PAYLOAD;
use crate::config::Settings;
use crate::engine::Engine;
use crate::error::ProxyError;

/// Single listening socket; one spawned handling unit per datagram.
pub struct Server {
    socket: Arc<UdpSocket>,
    engine: Engine,
    limiter: Option<Arc<Semaphore>>,
}

impl Server {
    /// Binds the listening socket. Must run inside a tokio runtime.
    pub fn bind(settings: &Settings, engine: Engine) -> anyhow::Result<Self> {
        let std_socket = create_udp_socket(settings.bind_addr)
            .with_context(|| format!("bind udp socket {}", settings.bind_addr))?;
        let socket = UdpSocket::from_std(std_socket).context("register udp socket")?;
        let limiter = (settings.max_inflight > 0).then(|| Arc::new(Semaphore::new(settings.max_inflight)));
        Ok(Self {
            socket: Arc::new(socket),
            engine,
            limiter,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves until the task is dropped. Read errors are logged and skipped.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];

        loop {
            // Waiting here leaves excess datagrams in the kernel buffer.
            let permit = match &self.limiter {
                Some(limiter) => Some(
                    Arc::clone(limiter)
                        .acquire_owned()
                        .await
                        .context("admission limiter closed")?,
                ),
                None => None,
            };

            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(err) => {
                    warn!(error = %err, "udp read error");
                    continue;
                }
            };
            let packet = Bytes::copy_from_slice(&buf[..len]);

            let socket = Arc::clone(&self.socket);
            let engine = self.engine.clone();
            tokio::spawn(async move {
                let _permit = permit;
                handle_datagram(&socket, &engine, &packet, peer).await;
            });
        }
    }
}

async fn handle_datagram(socket: &UdpSocket, engine: &Engine, packet: &[u8], peer: SocketAddr) {
    match engine.handle_packet(packet, peer).await {
        Ok(resp) => {
            if let Err(err) = socket.send_to(&resp, peer).await {
                warn!(client = %peer, stage = "reply", error = %err, "failed to send reply");
            }
        }
        Err(err @ (ProxyError::Parse(_) | ProxyError::NoQuestion)) => {
            info!(client = %peer, stage = err.stage(), len = packet.len(), error = %err, "dropping non dns datagram");
        }
        Err(err) => {
            warn!(client = %peer, stage = err.stage(), error = %err, "request dropped");
        }
    }
}

fn create_udp_socket(addr: SocketAddr) -> anyhow::Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    let _ = socket.set_recv_buffer_size(4 * 1024 * 1024);
    let _ = socket.set_send_buffer_size(4 * 1024 * 1024);
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}
