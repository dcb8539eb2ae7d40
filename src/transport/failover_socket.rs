use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::PeerLink;
use crate::decode_message;
use crate::encode_message;
use crate::metrics::FAILOVER_MESSAGES_REJECTED;
use crate::FailoverMessage;
use crate::LinkResolver;
use crate::MessageType;
use crate::NetworkError;
use crate::Result;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM_LEN: usize = 65_535;

/// The UDP socket of the legacy failover protocol. One socket both receives
/// from and sends to the peer.
#[derive(Debug, Clone)]
pub struct FailoverSocket {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
}

impl FailoverSocket {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(NetworkError::Socket)?;
        let local = socket.local_addr().map_err(NetworkError::Socket)?;
        info!("failover socket listening on {}", local);
        Ok(Self {
            socket: Arc::new(socket),
            local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// A [`PeerLink`] sending through this socket to `peer`.
    pub fn link(
        &self,
        peer: SocketAddr,
    ) -> FailoverPeerLink {
        FailoverPeerLink {
            socket: self.socket.clone(),
            peer,
        }
    }

    /// Decodes datagrams until `shutdown` fires or `inbound` is dropped.
    /// Undecodable datagrams are logged, counted and dropped.
    pub fn spawn_receiver(
        &self,
        links: LinkResolver,
        inbound: mpsc::UnboundedSender<FailoverMessage>,
        mut shutdown: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let local = self.local;

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
            loop {
                let (len, remote) = tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("failover receiver on {} stopping", local);
                        break;
                    }
                    received = socket.recv_from(&mut buf) => match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("failover socket {} receive failed: {:?}", local, e);
                            continue;
                        }
                    },
                };

                match decode_message(&buf[..len], local, remote, &links) {
                    Ok(msg) => {
                        if inbound.send(msg).is_err() {
                            debug!("inbound queue closed, failover receiver exiting");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("dropping datagram from {}: {}", remote, e);
                        let message_type = buf[..len]
                            .first()
                            .map(|code| MessageType::from_code(*code).name())
                            .unwrap_or("UNKNOWN");
                        FAILOVER_MESSAGES_REJECTED
                            .with_label_values(&[message_type, "decode"])
                            .inc();
                    }
                }
            }
        })
    }
}

/// [`PeerLink`] for the legacy protocol: one datagram per message.
#[derive(Debug, Clone)]
pub struct FailoverPeerLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl FailoverPeerLink {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl PeerLink for FailoverPeerLink {
    async fn send(
        &self,
        msg: FailoverMessage,
    ) -> Result<()> {
        let bytes = encode_message(&msg)?;
        self.socket
            .send_to(&bytes, self.peer)
            .await
            .map_err(NetworkError::Socket)?;
        trace!(
            "sent {} xid={} to {}",
            msg.message_type,
            msg.transaction_id,
            self.peer
        );
        Ok(())
    }
}
