use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use crate::Binding;
use crate::BindingOp;
use crate::Role;

/// Transaction ids are 24 bits wide, as in DHCPv6.
pub const TRANSACTION_ID_MASK: u32 = 0x00FF_FFFF;

/// Failover message types. Codes 1-12 are defined; anything else decodes to
/// `Unknown` so the pipeline can log and drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    BndAdd,
    BndUpd,
    BndDel,
    BndAck,
    BndNak,
    Poll,
    PollReply,
    CtlReq,
    CtlRet,
    CtlAck,
    BulkBndChg,
    BulkBndAck,
    Unknown(u8),
}

impl MessageType {
    pub const KNOWN: [MessageType; 12] = [
        MessageType::BndAdd,
        MessageType::BndUpd,
        MessageType::BndDel,
        MessageType::BndAck,
        MessageType::BndNak,
        MessageType::Poll,
        MessageType::PollReply,
        MessageType::CtlReq,
        MessageType::CtlRet,
        MessageType::CtlAck,
        MessageType::BulkBndChg,
        MessageType::BulkBndAck,
    ];

    pub fn code(self) -> u8 {
        match self {
            MessageType::BndAdd => 1,
            MessageType::BndUpd => 2,
            MessageType::BndDel => 3,
            MessageType::BndAck => 4,
            MessageType::BndNak => 5,
            MessageType::Poll => 6,
            MessageType::PollReply => 7,
            MessageType::CtlReq => 8,
            MessageType::CtlRet => 9,
            MessageType::CtlAck => 10,
            MessageType::BulkBndChg => 11,
            MessageType::BulkBndAck => 12,
            MessageType::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MessageType::BndAdd,
            2 => MessageType::BndUpd,
            3 => MessageType::BndDel,
            4 => MessageType::BndAck,
            5 => MessageType::BndNak,
            6 => MessageType::Poll,
            7 => MessageType::PollReply,
            8 => MessageType::CtlReq,
            9 => MessageType::CtlRet,
            10 => MessageType::CtlAck,
            11 => MessageType::BulkBndChg,
            12 => MessageType::BulkBndAck,
            other => MessageType::Unknown(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::BndAdd => "BNDADD",
            MessageType::BndUpd => "BNDUPD",
            MessageType::BndDel => "BNDDEL",
            MessageType::BndAck => "BNDACK",
            MessageType::BndNak => "BNDNAK",
            MessageType::Poll => "POLL",
            MessageType::PollReply => "POLLREPLY",
            MessageType::CtlReq => "CTLREQ",
            MessageType::CtlRet => "CTLRET",
            MessageType::CtlAck => "CTLACK",
            MessageType::BulkBndChg => "BULKBNDCHG",
            MessageType::BulkBndAck => "BULKBNDACK",
            MessageType::Unknown(_) => "UNKNOWN",
        }
    }

    /// Types whose payload is a JSON binding.
    pub fn is_binding(self) -> bool {
        self.binding_op().is_some()
    }

    pub fn binding_op(self) -> Option<BindingOp> {
        match self {
            MessageType::BndAdd => Some(BindingOp::Add),
            MessageType::BndUpd => Some(BindingOp::Update),
            MessageType::BndDel => Some(BindingOp::Delete),
            _ => None,
        }
    }

    pub fn for_binding_op(op: BindingOp) -> Self {
        match op {
            BindingOp::Add => MessageType::BndAdd,
            BindingOp::Update => MessageType::BndUpd,
            BindingOp::Delete => MessageType::BndDel,
        }
    }

    /// The only role allowed to send this type. The receiver must hold the
    /// other role.
    pub fn sender_role(self) -> Option<Role> {
        match self {
            MessageType::BndAdd
            | MessageType::BndUpd
            | MessageType::BndDel
            | MessageType::PollReply
            | MessageType::CtlReq
            | MessageType::CtlAck
            | MessageType::BulkBndAck => Some(Role::Primary),
            MessageType::BndAck
            | MessageType::BndNak
            | MessageType::Poll
            | MessageType::CtlRet
            | MessageType::BulkBndChg => Some(Role::Backup),
            MessageType::Unknown(_) => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            MessageType::Unknown(code) => write!(f, "UNKNOWN({})", code),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverPayload {
    /// Forwarded unchanged.
    Opaque(Vec<u8>),
    /// BNDADD/BNDUPD/BNDDEL payload, resolved to a local link on decode.
    Binding(Binding),
}

impl FailoverPayload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FailoverPayload::Opaque(bytes) => bytes,
            FailoverPayload::Binding(_) => &[],
        }
    }

    pub fn binding(&self) -> Option<&Binding> {
        match self {
            FailoverPayload::Binding(b) => Some(b),
            FailoverPayload::Opaque(_) => None,
        }
    }
}

/// A legacy failover protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverMessage {
    pub message_type: MessageType,
    pub transaction_id: u32,
    pub payload: FailoverPayload,
    /// Set on decode: the local socket the datagram arrived on.
    pub local: Option<SocketAddr>,
    /// Set on decode: the sender.
    pub remote: Option<SocketAddr>,
}

impl FailoverMessage {
    pub fn new(
        message_type: MessageType,
        transaction_id: u32,
        payload: FailoverPayload,
    ) -> Self {
        Self {
            message_type,
            transaction_id: transaction_id & TRANSACTION_ID_MASK,
            payload,
            local: None,
            remote: None,
        }
    }

    pub fn opaque(
        message_type: MessageType,
        transaction_id: u32,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(message_type, transaction_id, FailoverPayload::Opaque(payload.into()))
    }

    pub fn binding(
        op: BindingOp,
        transaction_id: u32,
        binding: Binding,
    ) -> Self {
        Self::new(
            MessageType::for_binding_op(op),
            transaction_id,
            FailoverPayload::Binding(binding),
        )
    }

    /// A reply of `message_type` echoing this message's transaction id.
    pub fn reply(
        &self,
        message_type: MessageType,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self::opaque(message_type, self.transaction_id, payload)
    }

    pub fn payload_text(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.as_bytes()).ok()
    }
}

/// Hands out 24-bit transaction ids, wrapping at the mask.
#[derive(Debug, Default)]
pub struct TransactionIds {
    next: AtomicU32,
}

impl TransactionIds {
    pub fn new(seed: u32) -> Self {
        Self {
            next: AtomicU32::new(seed & TRANSACTION_ID_MASK),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & TRANSACTION_ID_MASK
    }
}
