//! Wire codecs: the legacy binary failover message and the JSON lease
//! representation used by the REST and gRPC payloads.

mod failover_codec;
mod lease_json;
mod message;

pub use failover_codec::*;
pub use lease_json::*;
pub use message::*;
