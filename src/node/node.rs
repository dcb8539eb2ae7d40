//! One member of an HA pair.
//!
//! ## Key Responsibilities
//! - Owns the role FSM and the inbound message pipeline
//! - Dispatches inbound failover messages, one task per message
//! - Turns HA state exchanges from the peer into failover messages
//! - Sends binding changes to the peer according to the update mode
//! - Triggers lease sync when the peer comes back
//!
//! ## Example Usage
//! ```ignore
//! let node = HaNodeBuilder::new(None, shutdown_rx)?.build().await?;
//! node.run().await?;
//! ```

use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tonic::async_trait;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::BackupState;
use crate::Binding;
use crate::BindingOp;
use crate::FailoverMessage;
use crate::FsmHandle;
use crate::FsmState;
use crate::HaNodeConfig;
use crate::LeaseManager;
use crate::LeaseReplicator;
use crate::LeaseSyncPipeline;
use crate::LinkSyncState;
use crate::MessagePipeline;
use crate::MessageType;
use crate::PeerProtocol;
use crate::PeerStateHandler;
use crate::PipelineCounts;
use crate::PrimaryState;
use crate::Result;
use crate::Role;
use crate::StateHistoryStore;
use crate::TransactionIds;
use crate::UpdateMode;

pub struct HaNode {
    pub(crate) config: Arc<HaNodeConfig>,
    pub(crate) role: Role,
    pub(crate) peer_ip: IpAddr,

    pub(crate) fsm: FsmHandle,
    pub(crate) pipeline: Arc<MessagePipeline>,
    pub(crate) leases: Arc<dyn LeaseManager>,
    pub(crate) history: Arc<StateHistoryStore>,

    // Present for the REST and gRPC protocols only.
    pub(crate) replicator: Option<LeaseReplicator>,
    pub(crate) sync: Option<LeaseSyncPipeline>,

    pub(crate) xids: TransactionIds,
    pub(crate) inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<FailoverMessage>>>,
    pub(crate) last_peer_state: Mutex<Option<FsmState>>,
    pub(crate) ready: AtomicBool,
    pub(crate) shutdown_signal: watch::Receiver<()>,
}

impl HaNode {
    /// Serves inbound messages until the shutdown signal fires, then stops
    /// the FSM.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let Some(mut inbound) = self.inbound_rx.lock().take() else {
            warn!("HA node is already running");
            return Ok(());
        };

        self.watch_peer_for_sync();
        if self.config.ha.sync_on_start {
            if let Some(sync) = &self.sync {
                sync.start();
            }
        }

        self.set_ready(true);
        info!("HA node running as {} in {}", self.role, self.fsm.state());

        let mut shutdown = self.shutdown_signal.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    warn!("HA node shutting down");
                    break;
                }
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        debug!("inbound queue closed");
                        break;
                    };
                    let pipeline = self.pipeline.clone();
                    tokio::spawn(async move {
                        pipeline.handle(msg).await;
                    });
                }
            }
        }

        self.set_ready(false);
        self.fsm.stop();
        Ok(())
    }

    /// Lease sync on every rising edge of peer reachability.
    fn watch_peer_for_sync(&self) {
        let Some(sync) = self.sync.clone() else {
            return;
        };
        let mut peer = self.fsm.subscribe_peer();
        let mut shutdown = self.shutdown_signal.clone();

        tokio::spawn(async move {
            let mut reachable = *peer.borrow_and_update();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    changed = peer.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now = *peer.borrow_and_update();
                        if now && !reachable {
                            info!("peer is reachable again, syncing leases");
                            sync.start();
                        }
                        reachable = now;
                    }
                }
            }
        });
    }

    /// Sends a binding change to the peer as configured by `ha.update_mode`
    /// and `ha.protocol`.
    ///
    /// On the failover protocol only the Primary sends binding updates; in
    /// `sync` mode this returns once the FSM has an answer or gave up. On
    /// REST/gRPC each lease is replicated individually. `database` sends
    /// nothing.
    pub async fn binding_changed(
        &self,
        op: BindingOp,
        binding: Binding,
    ) -> Result<()> {
        let mode = self.config.ha.update_mode;
        if mode == UpdateMode::Database {
            return Ok(());
        }

        match self.config.ha.protocol {
            PeerProtocol::Failover => self.send_binding(op, binding, mode).await,
            PeerProtocol::Rest | PeerProtocol::Grpc => {
                self.replicate_binding(binding, mode).await;
                Ok(())
            }
        }
    }

    async fn send_binding(
        &self,
        op: BindingOp,
        binding: Binding,
        mode: UpdateMode,
    ) -> Result<()> {
        if self.role != Role::Primary {
            debug!("backup keeps {:?} local until control is returned", op);
            return Ok(());
        }

        let msg = FailoverMessage::binding(op, self.xids.next_id(), binding);
        let xid = msg.transaction_id;
        let mut states = self.fsm.subscribe_state();
        let outcome = self.fsm.send_binding(msg).await?;
        if !outcome.accepted {
            warn!("binding update xid={} not sent in {}", xid, outcome.from);
            return Ok(());
        }

        if mode == UpdateMode::Sync {
            let awaiting = FsmState::Primary(PrimaryState::AwaitingBindAck);
            if states.wait_for(|state| *state != awaiting).await.is_err() {
                warn!("FSM stopped while binding update xid={} was outstanding", xid);
            }
        }
        Ok(())
    }

    async fn replicate_binding(
        &self,
        binding: Binding,
        mode: UpdateMode,
    ) {
        let Some(replicator) = &self.replicator else {
            error!("no lease replicator for {:?}", self.config.ha.protocol);
            return;
        };

        for lease in binding.leases {
            if mode == UpdateMode::Sync {
                replicator.replicate(&lease).await;
            } else {
                let ip = lease.ip_address;
                replicator.replicate_async(
                    lease,
                    Box::new(move |synced: bool| debug!("async replication of {}: synced={}", ip, synced)),
                );
            }
        }
    }

    /// Runs a full lease sync and waits for every link. `None` when the
    /// protocol has no lease transport.
    pub async fn sync_leases(&self) -> Option<bool> {
        match &self.sync {
            Some(sync) => Some(sync.sync_all().await),
            None => None,
        }
    }

    pub fn link_states(&self) -> Vec<(String, LinkSyncState)> {
        self.sync.as_ref().map(|s| s.link_states()).unwrap_or_default()
    }

    /// The failover message a state reported by `remote` stands for, if any.
    fn message_for_peer_state(
        &self,
        remote: SocketAddr,
        peer_state: FsmState,
    ) -> Option<FailoverMessage> {
        let local = self.fsm.state();
        let (message_type, payload) = match (self.role, peer_state) {
            (Role::Primary, FsmState::Backup(_)) => (MessageType::Poll, peer_state.name().as_bytes().to_vec()),
            (Role::Backup, FsmState::Primary(PrimaryState::RequestingControl)) => (MessageType::CtlReq, Vec::new()),
            (Role::Backup, FsmState::Primary(PrimaryState::Running))
                if local == FsmState::Backup(BackupState::ReturningControl) =>
            {
                (MessageType::CtlAck, Vec::new())
            }
            _ => return None,
        };

        let mut msg = FailoverMessage::opaque(message_type, self.xids.next_id(), payload);
        msg.remote = Some(remote);
        Some(msg)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> FsmState {
        self.fsm.state()
    }

    pub fn fsm(&self) -> &FsmHandle {
        &self.fsm
    }

    /// The state the peer last reported through a state exchange.
    pub fn peer_state(&self) -> Option<FsmState> {
        *self.last_peer_state.lock()
    }

    pub fn leases(&self) -> Arc<dyn LeaseManager> {
        self.leases.clone()
    }

    pub fn history(&self) -> &StateHistoryStore {
        &self.history
    }

    pub fn pipeline_stats(&self) -> PipelineCounts {
        self.pipeline.stats()
    }

    pub fn config(&self) -> &HaNodeConfig {
        &self.config
    }

    pub fn set_ready(
        &self,
        is_ready: bool,
    ) {
        self.ready.store(is_ready, Ordering::SeqCst);
    }

    pub fn server_is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PeerStateHandler for HaNode {
    fn is_ready(&self) -> bool {
        self.server_is_ready()
    }

    async fn on_peer_state(
        &self,
        remote: SocketAddr,
        peer_state: Option<FsmState>,
    ) -> FsmState {
        let Some(peer_state) = peer_state else {
            return self.fsm.state();
        };
        if remote.ip() == self.peer_ip {
            *self.last_peer_state.lock() = Some(peer_state);
        } else {
            warn!("state {} reported by {}, not by peer {}", peer_state, remote, self.peer_ip);
        }

        // The pipeline drops and counts messages from anyone but the peer.
        if let Some(msg) = self.message_for_peer_state(remote, peer_state) {
            debug!("peer state {} handled as {}", peer_state, msg.message_type);
            self.pipeline.handle(msg).await;
        }
        self.fsm.state()
    }
}
