//! Role-agnostic state machine core.
//!
//! A [`StateMachine`] is a pure value: it consumes one [`Input`] at a time and
//! returns a [`Step`] describing the transition and the [`Action`]s the owner
//! must perform (send a message, arm or cancel the reply timer). It performs no
//! I/O and owns no timers, which keeps every transition synchronous and
//! testable. The per-role transition tables live in `primary.rs` and
//! `backup.rs` behind [`RoleTable`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tracing::debug;
use tracing::trace;

use super::AwaitKind;
use super::RetryCounter;
use crate::AwaitPolicies;
use crate::FailoverMessage;
use crate::FsmState;
use crate::MessageType;
use crate::Role;
use crate::TransactionIds;

/// Everything that may drive a transition.
#[derive(Debug, Clone)]
pub enum Input {
    /// Local startup.
    Start,
    /// The periodic poll timer fired.
    PollTick,
    /// Administrative or backup-initiated request to take control back.
    RequestControl,
    /// A binding update is about to be sent to the peer.
    SendBinding(FailoverMessage),
    /// A peer message that passed identity and role checks.
    Received(FailoverMessage),
    /// CTLACK received; `bulk_changes` holds the leases to hand back.
    ControlAcked { bulk_changes: Vec<u8> },
    /// Bulk binding changes from the peer have been applied locally.
    UpdatesApplied,
    /// The link could not send a message of this type at all.
    SendFailed(MessageType),
    /// The reply timer for `AwaitKind` expired.
    Timeout(AwaitKind),
}

impl Input {
    pub fn name(&self) -> &'static str {
        match self {
            Input::Start => "Start",
            Input::PollTick => "PollTick",
            Input::RequestControl => "RequestControl",
            Input::SendBinding(_) => "SendBinding",
            Input::Received(_) => "Received",
            Input::ControlAcked { .. } => "ControlAcked",
            Input::UpdatesApplied => "UpdatesApplied",
            Input::SendFailed(_) => "SendFailed",
            Input::Timeout(_) => "Timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(FailoverMessage),
    Arm(AwaitKind, Duration),
    Disarm,
}

/// Result of applying one input.
#[derive(Debug, Clone)]
pub struct Step<S> {
    pub accepted: bool,
    pub from: S,
    pub to: S,
    pub actions: Vec<Action>,
    /// The request whose reply was just matched, if any.
    pub resolved: Option<FailoverMessage>,
}

impl<S: PartialEq> Step<S> {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Per-role transition table.
pub trait RoleTable: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const ROLE: Role;

    fn initial() -> Self;

    fn all() -> &'static [Self];

    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;

    /// Returns the next state, or `None` when the input is not valid in this
    /// state (the input is then ignored and nothing changes).
    fn on_input(
        self,
        input: &Input,
        waits: &mut WaitTracker,
    ) -> Option<Self>;

    /// State to fall back to once the fail limit for `kind` is reached.
    fn fallback(
        self,
        kind: AwaitKind,
    ) -> Self;

    /// State to resume in after a restart. Waits are not persisted, so states
    /// that only exist while a wait is armed map to their stable neighbour.
    fn recover(self) -> Self;

    fn into_fsm_state(self) -> FsmState;
}

/// Reply waits, retry counters and peer reachability shared by both roles.
#[derive(Debug)]
pub struct WaitTracker {
    counters: HashMap<AwaitKind, RetryCounter>,
    awaiting: Option<AwaitKind>,
    last_request: Option<FailoverMessage>,
    xids: TransactionIds,
    peer_reachable: bool,
    actions: Vec<Action>,
    resolved: Option<FailoverMessage>,
}

impl WaitTracker {
    fn new(policies: &AwaitPolicies) -> Self {
        let counters = AwaitKind::ALL
            .iter()
            .map(|kind| (*kind, RetryCounter::from_policy(policies.get(*kind))))
            .collect();
        Self {
            counters,
            awaiting: None,
            last_request: None,
            xids: TransactionIds::default(),
            peer_reachable: false,
            actions: Vec::new(),
            resolved: None,
        }
    }

    pub fn awaiting(&self) -> Option<AwaitKind> {
        self.awaiting
    }

    pub fn counter(
        &self,
        kind: AwaitKind,
    ) -> Option<&RetryCounter> {
        self.counters.get(&kind)
    }

    pub fn peer_reachable(&self) -> bool {
        self.peer_reachable
    }

    pub fn peer_seen(&mut self) {
        self.peer_reachable = true;
    }

    /// Sends a message that expects no reply.
    pub fn send(
        &mut self,
        message_type: MessageType,
        payload: Vec<u8>,
    ) {
        let msg = FailoverMessage::opaque(message_type, self.xids.next_id(), payload);
        self.actions.push(Action::Send(msg));
    }

    /// Sends a request and waits for `kind`. Replaces any outstanding wait;
    /// the retry count of a replaced wait of the same kind carries over.
    pub fn request(
        &mut self,
        message_type: MessageType,
        payload: Vec<u8>,
        kind: AwaitKind,
    ) {
        let msg = FailoverMessage::opaque(message_type, self.xids.next_id(), payload);
        self.request_message(msg, kind);
    }

    pub fn request_message(
        &mut self,
        msg: FailoverMessage,
        kind: AwaitKind,
    ) {
        if let Some(previous) = self.awaiting {
            if previous != kind {
                self.reset_counter(previous);
            }
            trace!("replacing outstanding {:?} wait", previous);
        }
        self.awaiting = Some(kind);
        self.last_request = Some(msg.clone());
        self.actions.push(Action::Send(msg));
        self.arm(kind);
    }

    /// Matches a reply against the outstanding wait. Returns `false` for a
    /// reply nobody is waiting for (late, duplicate or after fallback).
    pub fn resolve(
        &mut self,
        kind: AwaitKind,
    ) -> bool {
        if self.awaiting != Some(kind) {
            debug!("ignoring {:?} reply: no matching wait (awaiting {:?})", kind, self.awaiting);
            return false;
        }
        self.awaiting = None;
        self.reset_counter(kind);
        self.resolved = self.last_request.take();
        self.peer_reachable = true;
        self.actions.push(Action::Disarm);
        true
    }

    /// Abandons the outstanding wait, if any.
    pub fn cancel_wait(&mut self) {
        if let Some(kind) = self.awaiting.take() {
            self.reset_counter(kind);
            self.last_request = None;
            self.actions.push(Action::Disarm);
        }
    }

    /// Counts a request that could not be sent at all as a missed reply and
    /// drops the wait. Returns `true` once the fail limit is reached.
    pub fn fail_wait(
        &mut self,
        kind: AwaitKind,
    ) -> bool {
        if self.awaiting != Some(kind) {
            return false;
        }
        self.awaiting = None;
        self.last_request = None;
        self.actions.push(Action::Disarm);

        let exhausted = match self.counters.get_mut(&kind) {
            Some(counter) => counter.record_timeout(),
            None => true,
        };
        if exhausted {
            self.reset_counter(kind);
            self.peer_reachable = false;
        }
        exhausted
    }

    fn reset_counter(
        &mut self,
        kind: AwaitKind,
    ) {
        if let Some(counter) = self.counters.get_mut(&kind) {
            counter.reset();
        }
    }

    fn arm(
        &mut self,
        kind: AwaitKind,
    ) {
        let timeout = self
            .counters
            .get(&kind)
            .map(RetryCounter::timeout)
            .unwrap_or_default();
        self.actions.push(Action::Arm(kind, timeout));
    }

    /// Returns `true` when the fail limit was reached and the wait dropped.
    fn on_timeout(
        &mut self,
        kind: AwaitKind,
    ) -> bool {
        let exhausted = match self.counters.get_mut(&kind) {
            Some(counter) => counter.record_timeout(),
            None => true,
        };
        if exhausted {
            self.awaiting = None;
            self.last_request = None;
            self.reset_counter(kind);
            self.peer_reachable = false;
            self.actions.push(Action::Disarm);
            return true;
        }

        if kind.resends_on_timeout() {
            if let Some(msg) = self.last_request.clone() {
                self.actions.push(Action::Send(msg));
            }
        }
        self.arm(kind);
        false
    }

    fn take_outputs(&mut self) -> (Vec<Action>, Option<FailoverMessage>) {
        (std::mem::take(&mut self.actions), self.resolved.take())
    }
}

/// One role's machine: current state plus its wait tracker.
#[derive(Debug)]
pub struct StateMachine<S: RoleTable> {
    state: S,
    waits: WaitTracker,
}

impl<S: RoleTable> StateMachine<S> {
    pub fn new(
        initial: S,
        policies: &AwaitPolicies,
    ) -> Self {
        Self {
            state: initial,
            waits: WaitTracker::new(policies),
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn waits(&self) -> &WaitTracker {
        &self.waits
    }

    pub fn step(
        &mut self,
        input: Input,
    ) -> Step<S> {
        let from = self.state;

        let next = match &input {
            Input::Timeout(kind) => {
                if self.waits.awaiting != Some(*kind) {
                    trace!("stale {:?} timeout in {:?}", kind, from);
                    None
                } else if self.waits.on_timeout(*kind) {
                    Some(from.fallback(*kind))
                } else {
                    Some(from)
                }
            }
            other => from.on_input(other, &mut self.waits),
        };

        let (actions, resolved) = self.waits.take_outputs();
        let accepted = next.is_some();
        if let Some(to) = next {
            self.state = to;
        } else {
            trace!("{:?} ignored {} input", from, input.name());
        }

        Step {
            accepted,
            from,
            to: self.state,
            actions,
            resolved,
        }
    }
}
