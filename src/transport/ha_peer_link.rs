use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use super::PeerLink;
use super::PeerTransport;
use crate::decode_leases;
use crate::BackupState;
use crate::FailoverMessage;
use crate::FsmState;
use crate::MessageType;
use crate::NetworkError;
use crate::PrimaryState;
use crate::ProtocolError;
use crate::Result;

/// [`PeerLink`] for the REST/gRPC protocol.
///
/// There is no datagram path back from the peer: each request is a state
/// exchange, and the peer's answer is turned into the reply the failover
/// protocol would have delivered. Replies are injected into `inbound` with
/// `remote` set to the peer so they pass the same checks as UDP traffic.
pub struct HaPeerLink {
    transport: Arc<dyn PeerTransport>,
    inbound: mpsc::UnboundedSender<FailoverMessage>,
    peer: SocketAddr,
}

impl HaPeerLink {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        inbound: mpsc::UnboundedSender<FailoverMessage>,
        peer: SocketAddr,
    ) -> Self {
        Self {
            transport,
            inbound,
            peer,
        }
    }

    fn inject(
        &self,
        request: &FailoverMessage,
        message_type: MessageType,
        payload: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let mut reply = request.reply(message_type, payload);
        reply.remote = Some(self.peer);
        self.inbound
            .send(reply)
            .map_err(|_| NetworkError::SignalSendFailed("inbound queue closed".to_string()).into())
    }

    async fn poll(
        &self,
        msg: &FailoverMessage,
    ) -> Result<()> {
        let own = msg
            .payload_text()
            .ok_or_else(|| ProtocolError::InvalidState("non UTF-8 poll payload".to_string()))?
            .parse::<FsmState>()?;

        // No answer is a missed reply, left to the poll-reply timer.
        if let Some(peer_state) = self.transport.get_peer_state(own).await {
            self.inject(msg, MessageType::PollReply, peer_state.name())?;
        }
        Ok(())
    }

    async fn request_control(
        &self,
        msg: &FailoverMessage,
    ) -> Result<()> {
        let own = FsmState::Primary(PrimaryState::RequestingControl);
        match self.transport.get_peer_state(own).await {
            Some(FsmState::Backup(BackupState::ReturningControl)) => {
                self.inject(msg, MessageType::CtlRet, Vec::new())
            }
            Some(other) => {
                debug!("peer answered control request with {}", other);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn ack_control(&self) -> Result<()> {
        let own = FsmState::Primary(PrimaryState::Running);
        if self.transport.get_peer_state(own).await.is_none() {
            warn!("peer did not take the control ack");
        }
        Ok(())
    }

    async fn push_bulk(
        &self,
        msg: &FailoverMessage,
    ) -> Result<()> {
        let leases = decode_leases(msg.payload.as_bytes())?;
        let failed = match self.transport.update_leases(&leases).await {
            Some(stored) => {
                let confirmed = stored
                    .iter()
                    .zip(&leases)
                    .filter(|(stored, lease)| stored.same_lease(lease))
                    .count();
                leases.len() - confirmed
            }
            None => leases.len(),
        };

        if failed > 0 {
            // The bulk-ack timer resends the whole batch.
            warn!("{} of {} bulk leases not confirmed by peer", failed, leases.len());
            return Ok(());
        }
        self.inject(msg, MessageType::BulkBndAck, Vec::new())
    }
}

#[async_trait]
impl PeerLink for HaPeerLink {
    async fn send(
        &self,
        msg: FailoverMessage,
    ) -> Result<()> {
        match msg.message_type {
            MessageType::Poll => self.poll(&msg).await,
            MessageType::CtlReq => self.request_control(&msg).await,
            MessageType::CtlAck => self.ack_control().await,
            MessageType::BulkBndChg => self.push_bulk(&msg).await,
            // Answers to state exchanges travel in the exchange response, and
            // binding updates go through the lease replicator.
            other => {
                debug!("{} has no HA equivalent, not sent", other);
                Ok(())
            }
        }
    }
}
