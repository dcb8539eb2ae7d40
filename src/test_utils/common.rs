use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Once;

use crate::DhcpLease;
use crate::HaNodeConfig;
use crate::IaType;
use crate::LeaseState;
use crate::LinkConfig;
use crate::LinkResolver;
use crate::PeerProtocol;
use crate::Role;

static LOGGER_INIT: Once = Once::new();

pub fn enable_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// A leased NA lease at `s` whose peer state is unknown.
pub fn leased(s: &str) -> DhcpLease {
    let ip_address = ip(s);
    let iaid = match ip_address {
        IpAddr::V4(v4) => u32::from(v4.octets()[3]),
        IpAddr::V6(v6) => u32::from(v6.segments()[7]),
    };
    let mut lease = DhcpLease::new(ip_address, "000100011c39cf88080027fe8f95", IaType::Na, iaid, LeaseState::Leased);
    lease.start_time = 1_700_000_000_000;
    lease.preferred_end_time = 1_700_000_300_000;
    lease.valid_end_time = 1_700_000_600_000;
    lease
}

pub fn synced(s: &str) -> DhcpLease {
    let mut lease = leased(s);
    lease.mark_synced();
    lease
}

pub fn lan_link() -> LinkConfig {
    LinkConfig::new("lan", ip("10.0.0.0"), ip("10.0.0.255"))
}

pub fn lan_resolver() -> LinkResolver {
    LinkResolver::new(vec![lan_link()])
}

/// A port nothing listens on right now, TCP and UDP alike.
pub fn free_port() -> u16 {
    let tcp = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = tcp.local_addr().unwrap().port();
    std::net::UdpSocket::bind(("127.0.0.1", port)).map(|_| port).unwrap_or_else(|_| free_port())
}

/// A valid node config on 127.0.0.1 with its peer on 127.0.0.2, state kept
/// under `data_dir`, serving the `lan` link.
pub fn ha_node_config(
    data_dir: &Path,
    role: Role,
    protocol: PeerProtocol,
) -> HaNodeConfig {
    let mut config = HaNodeConfig::default();
    config.server.listen_address = ip("127.0.0.1");
    config.server.failover_port = free_port();
    config.server.rest_port = free_port();
    config.server.grpc_port = free_port();
    config.server.data_dir = data_dir.to_path_buf();
    config.server.log_dir = data_dir.join("logs");
    config.ha.role = role;
    config.ha.peer_address = "127.0.0.2".to_string();
    config.ha.peer_failover_port = free_port();
    config.ha.protocol = protocol;
    config.links = vec![lan_link()];
    config
}
