use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::AwaitPolicies;
use crate::FailoverMessage;
use crate::FsmHandle;
use crate::FsmState;
use crate::LeaseManager;
use crate::MemLeaseManager;
use crate::MessagePipeline;
use crate::MessageType;
use crate::MockPeerLink;
use crate::PeerLink;
use crate::ProcessContext;
use crate::Role;

use super::lan_resolver;

pub type SentLog = Arc<Mutex<Vec<FailoverMessage>>>;

pub const PRIMARY_IP: &str = "10.1.0.1";
pub const BACKUP_IP: &str = "10.1.0.2";

/// A link that records everything sent through it.
pub fn recording_link() -> (Arc<dyn PeerLink>, SentLog) {
    let sent: SentLog = Arc::new(Mutex::new(Vec::new()));
    let log = sent.clone();
    let mut link = MockPeerLink::new();
    link.expect_send().returning(move |msg| {
        log.lock().push(msg);
        Ok(())
    });
    (Arc::new(link), sent)
}

/// Waits until a message of `message_type` has been sent.
pub async fn wait_sent(
    sent: &SentLog,
    message_type: MessageType,
) -> FailoverMessage {
    for _ in 0..200 {
        if let Some(msg) = sent.lock().iter().find(|m| m.message_type == message_type) {
            return msg.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} was never sent", message_type);
}

/// One side of the pair: a running FSM, its pipeline and its leases.
pub struct PipelineHarness {
    pub pipeline: MessagePipeline,
    pub fsm: FsmHandle,
    pub sent: SentLog,
    pub fsm_task: JoinHandle<()>,
}

impl PipelineHarness {
    /// `recovered` picks the starting state; the FSM never polls on its own.
    pub async fn start(
        role: Role,
        recovered: Option<FsmState>,
        leases: Arc<dyn LeaseManager>,
    ) -> Self {
        let (link, sent) = recording_link();
        let (fsm, fsm_task) = crate::spawn_fsm(
            role,
            recovered,
            &AwaitPolicies::default(),
            link.clone(),
            None,
            None,
        )
        .unwrap();

        // Let the actor apply its start input.
        let _ = fsm.submit(crate::Input::Start).await.unwrap();

        let peer_ip = match role {
            Role::Primary => BACKUP_IP,
            _ => PRIMARY_IP,
        };
        let ctx = ProcessContext {
            role,
            peer_ip: peer_ip.parse().unwrap(),
            fsm: fsm.clone(),
            leases,
            links: lan_resolver(),
            link,
        };
        Self {
            pipeline: MessagePipeline::new(ctx),
            fsm,
            sent,
            fsm_task,
        }
    }

    pub async fn with_mem_leases(
        role: Role,
        recovered: Option<FsmState>,
    ) -> (Self, Arc<MemLeaseManager>) {
        let leases = Arc::new(MemLeaseManager::new());
        (Self::start(role, recovered, leases.clone()).await, leases)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.pipeline.context().peer_ip, 647)
    }

    /// `msg` as if it arrived from the configured peer.
    pub fn from_peer(
        &self,
        mut msg: FailoverMessage,
    ) -> FailoverMessage {
        msg.remote = Some(self.peer_addr());
        msg
    }

    pub fn from_ip(
        &self,
        mut msg: FailoverMessage,
        ip: IpAddr,
    ) -> FailoverMessage {
        msg.remote = Some(SocketAddr::new(ip, 647));
        msg
    }
}
