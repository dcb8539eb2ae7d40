//! JSON representation of leases, shared by the REST surface, the gRPC
//! `LeaseMessage` and the BULKBNDCHG payload.

use crate::DhcpLease;
use crate::Result;

pub fn encode_lease(lease: &DhcpLease) -> Result<String> {
    Ok(serde_json::to_string(lease)?)
}

pub fn decode_lease(json: &str) -> Result<DhcpLease> {
    Ok(serde_json::from_str(json)?)
}

pub fn encode_leases(leases: &[DhcpLease]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(leases)?)
}

pub fn decode_leases(bytes: &[u8]) -> Result<Vec<DhcpLease>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// One lease per line, newline terminated, for streamed bulk reads.
pub fn encode_lease_line(lease: &DhcpLease) -> Result<String> {
    let mut line = encode_lease(lease)?;
    line.push('\n');
    Ok(line)
}

/// Splits complete lines off the front of `buf`, leaving any partial tail in
/// place for the next chunk.
pub fn drain_lease_lines(buf: &mut Vec<u8>) -> Result<Vec<DhcpLease>> {
    let mut leases = Vec::new();
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let line = &line[..line.len() - 1];
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        leases.push(serde_json::from_slice(line)?);
    }
    Ok(leases)
}
