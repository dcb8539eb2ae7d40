//! Binary layout of a failover message:
//!
//! ```text
//!  0        1                 4
//! +--------+-----------------+------------------------+
//! |  type  | transaction id  | payload ...            |
//! +--------+-----------------+------------------------+
//! ```
//! The transaction id is 24 bits, big-endian. Binding messages carry UTF-8
//! JSON; everything else is forwarded as opaque bytes.

use std::net::SocketAddr;

use tracing::trace;

use super::FailoverMessage;
use super::FailoverPayload;
use super::MessageType;
use super::TRANSACTION_ID_MASK;
use crate::Binding;
use crate::DecodeError;
use crate::LinkResolver;
use crate::Result;

pub const HEADER_LEN: usize = 4;

pub fn encode_message(msg: &FailoverMessage) -> Result<Vec<u8>> {
    let payload = match &msg.payload {
        FailoverPayload::Opaque(bytes) => bytes.clone(),
        FailoverPayload::Binding(binding) => serde_json::to_vec(binding)?,
    };

    let xid = msg.transaction_id & TRANSACTION_ID_MASK;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(msg.message_type.code());
    buf.push((xid >> 16) as u8);
    buf.push((xid >> 8) as u8);
    buf.push(xid as u8);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one datagram. Binding payloads must parse and their first lease
/// address must fall inside one of `links`.
pub fn decode_message(
    buf: &[u8],
    local: SocketAddr,
    remote: SocketAddr,
    links: &LinkResolver,
) -> std::result::Result<FailoverMessage, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(buf.len()));
    }

    let message_type = MessageType::from_code(buf[0]);
    let transaction_id = (u32::from(buf[1]) << 16) | (u32::from(buf[2]) << 8) | u32::from(buf[3]);
    let body = &buf[HEADER_LEN..];

    let payload = if message_type.is_binding() {
        let mut binding: Binding = serde_json::from_slice(body)?;
        let addr = binding.first_address().ok_or(DecodeError::EmptyBinding)?;
        let link = links.resolve(&addr).ok_or(DecodeError::NoMatchingLink(addr))?;
        binding.link = Some(link.name.clone());
        FailoverPayload::Binding(binding)
    } else {
        FailoverPayload::Opaque(body.to_vec())
    };

    trace!(
        "decoded {} xid={} from {} ({} payload bytes)",
        message_type,
        transaction_id,
        remote,
        body.len()
    );

    Ok(FailoverMessage {
        message_type,
        transaction_id,
        payload,
        local: Some(local),
        remote: Some(remote),
    })
}
