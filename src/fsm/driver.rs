//! Actor that owns one [`StateMachine`].
//!
//! All inputs (peer messages, poll ticks, timer expiries, send failures,
//! administrative requests) arrive on a single command queue, so a transition
//! is never interleaved with another. Timers and the outbound send queue run
//! as separate tasks and only talk back through that queue; a reply can
//! always be delivered while a wait is armed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Action;
use super::AwaitKind;
use super::Input;
use super::RoleTable;
use super::StateMachine;
use super::Step;
use crate::metrics::FSM_TRANSITIONS;
use crate::metrics::PEER_REACHABLE;
use crate::AwaitPolicies;
use crate::BackupState;
use crate::Error;
use crate::FailoverMessage;
use crate::FsmState;
use crate::PeerLink;
use crate::PrimaryState;
use crate::ProtocolError;
use crate::Result;
use crate::Role;
use crate::StateHistoryStore;

/// What a submitted input did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmOutcome {
    pub accepted: bool,
    pub from: FsmState,
    pub to: FsmState,
    /// The request matched by this input, e.g. the binding a BNDACK answers.
    pub resolved: Option<FailoverMessage>,
}

impl FsmOutcome {
    fn from_step<S: RoleTable>(step: &Step<S>) -> Self {
        Self {
            accepted: step.accepted,
            from: step.from.into_fsm_state(),
            to: step.to.into_fsm_state(),
            resolved: step.resolved.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum FsmCommand {
    Input(Input, Option<oneshot::Sender<FsmOutcome>>),
    Timeout { kind: AwaitKind, epoch: u64 },
    Stop,
}

/// Cloneable handle to a running FSM actor.
#[derive(Debug, Clone)]
pub struct FsmHandle {
    role: Role,
    cmd_tx: mpsc::UnboundedSender<FsmCommand>,
    state_rx: watch::Receiver<FsmState>,
    peer_rx: watch::Receiver<bool>,
}

impl FsmHandle {
    /// Applies `input` and waits for the outcome.
    pub async fn submit(
        &self,
        input: Input,
    ) -> Result<FsmOutcome> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(FsmCommand::Input(input, Some(tx)))
            .map_err(|_| ProtocolError::FsmStopped)?;
        rx.await.map_err(|_| ProtocolError::FsmStopped.into())
    }

    /// Queues `input` without waiting for it to be applied.
    pub fn notify(
        &self,
        input: Input,
    ) -> Result<()> {
        self.cmd_tx
            .send(FsmCommand::Input(input, None))
            .map_err(|_| ProtocolError::FsmStopped.into())
    }

    pub async fn request_control(&self) -> Result<FsmOutcome> {
        self.submit(Input::RequestControl).await
    }

    pub async fn send_binding(
        &self,
        msg: FailoverMessage,
    ) -> Result<FsmOutcome> {
        self.submit(Input::SendBinding(msg)).await
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> FsmState {
        *self.state_rx.borrow()
    }

    pub fn peer_reachable(&self) -> bool {
        *self.peer_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FsmState> {
        self.state_rx.clone()
    }

    pub fn subscribe_peer(&self) -> watch::Receiver<bool> {
        self.peer_rx.clone()
    }

    /// Stops the actor, its timers and its poll task. In-flight sends
    /// complete and their failures are discarded.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(FsmCommand::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

pub struct FsmDriver<S: RoleTable> {
    machine: StateMachine<S>,
    history: Option<Arc<StateHistoryStore>>,
    poll_interval: Option<Duration>,

    cmd_tx: mpsc::UnboundedSender<FsmCommand>,
    cmd_rx: mpsc::UnboundedReceiver<FsmCommand>,
    send_tx: mpsc::UnboundedSender<FailoverMessage>,
    state_tx: watch::Sender<FsmState>,
    peer_tx: watch::Sender<bool>,

    // Incremented on every arm/disarm; a timeout with an older epoch is stale.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    sender_task: JoinHandle<()>,
}

impl<S: RoleTable> FsmDriver<S> {
    pub fn new(
        initial: S,
        policies: &AwaitPolicies,
        link: Arc<dyn PeerLink>,
        history: Option<Arc<StateHistoryStore>>,
        poll_interval: Option<Duration>,
    ) -> (Self, FsmHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial.into_fsm_state());
        let (peer_tx, peer_rx) = watch::channel(false);
        let (send_tx, send_rx) = mpsc::unbounded_channel();

        let sender_task = tokio::spawn(run_sender(link, send_rx, cmd_tx.clone()));

        let handle = FsmHandle {
            role: S::ROLE,
            cmd_tx: cmd_tx.clone(),
            state_rx,
            peer_rx,
        };
        let driver = Self {
            machine: StateMachine::new(initial, policies),
            history,
            poll_interval,
            cmd_tx,
            cmd_rx,
            send_tx,
            state_tx,
            peer_tx,
            epoch: 0,
            timer: None,
            poll_task: None,
            sender_task,
        };
        (driver, handle)
    }

    pub async fn run(mut self) {
        info!(
            "[{}] FSM starting in {}",
            S::ROLE,
            self.machine.state().into_fsm_state()
        );
        self.start_polling();
        self.apply(Input::Start, None);

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                FsmCommand::Input(input, reply) => self.apply(input, reply),
                FsmCommand::Timeout { kind, epoch } => {
                    if epoch != self.epoch {
                        trace!("[{}] dropping stale {:?} timer (epoch {})", S::ROLE, kind, epoch);
                        continue;
                    }
                    self.timer = None;
                    self.apply(Input::Timeout(kind), None);
                }
                FsmCommand::Stop => break,
            }
        }

        self.shutdown();
    }

    /// Backup machines poll at a fixed rate, independent of how long each
    /// poll takes to resolve.
    fn start_polling(&mut self) {
        let Some(period) = self.poll_interval else {
            return;
        };
        if S::ROLE != Role::Backup {
            return;
        }

        let cmd_tx = self.cmd_tx.clone();
        self.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if cmd_tx.send(FsmCommand::Input(Input::PollTick, None)).is_err() {
                    break;
                }
            }
        }));
    }

    fn apply(
        &mut self,
        input: Input,
        reply: Option<oneshot::Sender<FsmOutcome>>,
    ) {
        let was_reachable = self.machine.waits().peer_reachable();
        let step = self.machine.step(input);

        for action in &step.actions {
            match action {
                Action::Send(msg) => {
                    if self.send_tx.send(msg.clone()).is_err() {
                        error!("[{}] send queue closed, dropping {}", S::ROLE, msg.message_type);
                    }
                }
                Action::Arm(kind, timeout) => self.arm(*kind, *timeout),
                Action::Disarm => self.disarm(),
            }
        }

        if step.changed() {
            self.on_transition(&step);
        }

        let reachable = self.machine.waits().peer_reachable();
        if reachable != was_reachable {
            info!("[{}] peer reachable: {}", S::ROLE, reachable);
            PEER_REACHABLE
                .with_label_values(&[S::ROLE.name()])
                .set(i64::from(reachable));
            self.peer_tx.send_replace(reachable);
        }

        if let Some(reply) = reply {
            let _ = reply.send(FsmOutcome::from_step(&step));
        }
    }

    fn on_transition(
        &mut self,
        step: &Step<S>,
    ) {
        let to = step.to.into_fsm_state();
        info!("[{}] {} -> {}", S::ROLE, step.from.name(), to);
        FSM_TRANSITIONS
            .with_label_values(&[S::ROLE.name(), to.name()])
            .inc();

        if let Some(history) = &self.history {
            if let Err(e) = history.update(to) {
                error!("[{}] failed to persist state {}: {:?}", S::ROLE, to, e);
            }
        }
        self.state_tx.send_replace(to);
    }

    fn arm(
        &mut self,
        kind: AwaitKind,
        timeout: Duration,
    ) {
        self.disarm();
        let epoch = self.epoch;
        let cmd_tx = self.cmd_tx.clone();
        debug!("[{}] awaiting {:?} for {:?}", S::ROLE, kind, timeout);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = cmd_tx.send(FsmCommand::Timeout { kind, epoch });
        }));
    }

    fn disarm(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn shutdown(&mut self) {
        self.disarm();
        if let Some(poll) = self.poll_task.take() {
            poll.abort();
        }
        self.sender_task.abort();
        self.cmd_rx.close();
        warn!("[{}] FSM stopped in {}", S::ROLE, self.machine.state().into_fsm_state());
    }
}

/// Sends queued messages in order. A failed send is fed back as
/// [`Input::SendFailed`].
async fn run_sender(
    link: Arc<dyn PeerLink>,
    mut send_rx: mpsc::UnboundedReceiver<FailoverMessage>,
    cmd_tx: mpsc::UnboundedSender<FsmCommand>,
) {
    while let Some(msg) = send_rx.recv().await {
        let message_type = msg.message_type;
        if let Err(e) = link.send(msg).await {
            warn!("failed to send {} to peer: {:?}", message_type, e);
            if cmd_tx
                .send(FsmCommand::Input(Input::SendFailed(message_type), None))
                .is_err()
            {
                break;
            }
        }
    }
}

/// Resumes from `recovered` if it belongs to this role, else starts fresh.
pub fn initial_state<S: RoleTable>(recovered: Option<FsmState>) -> S {
    recovered
        .and_then(|state| S::from_name(state.name()))
        .map(S::recover)
        .unwrap_or_else(S::initial)
}

fn spawn_driver<S: RoleTable>(
    recovered: Option<FsmState>,
    policies: &AwaitPolicies,
    link: Arc<dyn PeerLink>,
    history: Option<Arc<StateHistoryStore>>,
    poll_interval: Option<Duration>,
) -> (FsmHandle, JoinHandle<()>) {
    let initial = initial_state::<S>(recovered);
    let (driver, handle) = FsmDriver::new(initial, policies, link, history, poll_interval);
    (handle, tokio::spawn(driver.run()))
}

/// Spawns the machine for `role`.
pub fn spawn_fsm(
    role: Role,
    recovered: Option<FsmState>,
    policies: &AwaitPolicies,
    link: Arc<dyn PeerLink>,
    history: Option<Arc<StateHistoryStore>>,
    poll_interval: Option<Duration>,
) -> Result<(FsmHandle, JoinHandle<()>)> {
    match role {
        Role::Primary => Ok(spawn_driver::<PrimaryState>(
            recovered,
            policies,
            link,
            history,
            poll_interval,
        )),
        Role::Backup => Ok(spawn_driver::<BackupState>(
            recovered,
            policies,
            link,
            history,
            poll_interval,
        )),
        Role::NotConfigured => Err(Error::InvalidConfig("HA role is not configured".to_string())),
    }
}
