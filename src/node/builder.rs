//! Assembles an [`HaNode`] from configuration.
//!
//! The [`HaNodeBuilder`] loads and validates the configuration, recovers the
//! FSM state from the history file, picks the peer link for the configured
//! protocol and spawns the role FSM.
//!
//! ## Key Design Points
//! - **Default Components**: an empty in-memory lease store, and the peer transport matching
//!   `ha.protocol`.
//! - **Customization**: `lease_manager()` and `transport()` replace the defaults.
//! - **Lifecycle Management**:
//!   - `build()`: Binds the failover socket (legacy protocol), spawns the FSM and assembles the
//!     [`HaNode`].
//!   - `start_rest_server()`/`start_grpc_server()`: Launches the peer-facing surfaces.
//!   - `ready()`: Returns the built [`HaNode`].
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let node = HaNodeBuilder::new(None, shutdown_rx)?
//!     .build()
//!     .await?
//!     .start_rest_server()
//!     .start_grpc_server()
//!     .ready()?;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::HaNode;
use crate::spawn_fsm;
use crate::start_grpc_server;
use crate::start_rest_server;
use crate::utils::time::now_millis;
use crate::FailoverMessage;
use crate::FailoverSocket;
use crate::GrpcPeerTransport;
use crate::HaApi;
use crate::HaNodeConfig;
use crate::HaPeerLink;
use crate::LeaseManager;
use crate::LeaseReplicator;
use crate::LeaseSyncPipeline;
use crate::LinkResolver;
use crate::MemLeaseManager;
use crate::MessagePipeline;
use crate::PeerLink;
use crate::PeerProtocol;
use crate::PeerTransport;
use crate::ProcessContext;
use crate::RestPeerTransport;
use crate::Result;
use crate::Role;
use crate::StateHistoryStore;
use crate::SystemError;
use crate::TransactionIds;

pub struct HaNodeBuilder {
    pub(super) config: HaNodeConfig,
    pub(super) leases: Option<Arc<dyn LeaseManager>>,
    pub(super) transport: Option<Arc<dyn PeerTransport>>,
    pub(super) shutdown_signal: watch::Receiver<()>,

    pub(super) node: Option<Arc<HaNode>>,
}

impl HaNodeBuilder {
    /// Loads configuration from defaults, files and environment, then
    /// merges `config_path` on top when given.
    pub fn new(
        config_path: Option<&str>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Result<Self> {
        let mut config = HaNodeConfig::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", &p);
            config = config.with_override_config(p)?;
        }
        Ok(Self::from_config(config, shutdown_signal))
    }

    /// Uses an in-memory configuration as is. It is still validated by
    /// [`HaNodeBuilder::build`].
    pub fn from_config(
        config: HaNodeConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            leases: None,
            transport: None,
            shutdown_signal,
            node: None,
        }
    }

    /// Sets the lease store the node reads and writes
    pub fn lease_manager(
        mut self,
        leases: Arc<dyn LeaseManager>,
    ) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Sets the REST/gRPC peer transport. Ignored on the legacy protocol.
    pub fn transport(
        mut self,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the configuration and assembles the node.
    ///
    /// Fails when the configuration is invalid, the history file cannot be
    /// written, or the failover socket cannot be bound. In any of these
    /// cases the HA subsystem must not start.
    pub async fn build(mut self) -> Result<Self> {
        let config = Arc::new(self.config.clone().validate()?);
        let role = config.ha.role;
        let peer_ip = config.peer_ip()?;

        let history = Arc::new(StateHistoryStore::open(config.state_file(), config.ha.max_stored_states)?);
        let recovered = history.init(role)?.fsm_state();
        debug!("{} starts from {:?}", role, recovered);

        let leases = self
            .leases
            .take()
            .unwrap_or_else(|| Arc::new(MemLeaseManager::new()));
        let links = LinkResolver::new(config.links.clone());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<FailoverMessage>();

        let (link, transport): (Arc<dyn PeerLink>, Option<Arc<dyn PeerTransport>>) = match config.ha.protocol {
            PeerProtocol::Failover => {
                let socket = FailoverSocket::bind(config.server.failover_addr()).await?;
                socket.spawn_receiver(links.clone(), inbound_tx, self.shutdown_signal.clone());
                let peer = SocketAddr::new(peer_ip, config.ha.peer_failover_port);
                (Arc::new(socket.link(peer)), None)
            }
            PeerProtocol::Rest | PeerProtocol::Grpc => {
                let transport = match self.transport.take() {
                    Some(transport) => transport,
                    None => default_transport(&config).await?,
                };
                let peer = SocketAddr::new(peer_ip, peer_port(&config));
                let link = HaPeerLink::new(transport.clone(), inbound_tx, peer);
                (Arc::new(link), Some(transport))
            }
        };

        // Only the Backup polls.
        let poll_interval = (role == Role::Backup).then(|| config.ha.poll_interval());
        let (fsm, _fsm_task) = spawn_fsm(
            role,
            recovered,
            &config.ha.awaits,
            link.clone(),
            Some(history.clone()),
            poll_interval,
        )?;

        let pipeline = Arc::new(MessagePipeline::new(ProcessContext {
            role,
            peer_ip,
            fsm: fsm.clone(),
            leases: leases.clone(),
            links: links.clone(),
            link,
        }));

        let replicator = transport
            .as_ref()
            .map(|t| LeaseReplicator::new(t.clone(), leases.clone()));
        let sync = transport
            .as_ref()
            .map(|t| LeaseSyncPipeline::new(t.clone(), leases.clone(), links, config.ha.sync_unsynced_only));

        let node = HaNode {
            config,
            role,
            peer_ip,
            fsm,
            pipeline,
            leases,
            history,
            replicator,
            sync,
            xids: TransactionIds::new(now_millis() as u32),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            last_peer_state: Mutex::new(None),
            ready: AtomicBool::new(false),
            shutdown_signal: self.shutdown_signal.clone(),
        };

        self.node = Some(Arc::new(node));
        Ok(self)
    }

    /// Serves the lease API, the HA state exchange and `/metrics`.
    pub fn start_rest_server(self) -> Self {
        if let Some(ref node) = self.node {
            let api = HaApi::new(node.clone(), node.leases());
            let addr = self.config.server.rest_addr();
            let shutdown = self.shutdown_signal.clone();
            tokio::spawn(async move {
                if let Err(e) = start_rest_server(api, addr, shutdown).await {
                    error!("REST server stops. {:?}", e);
                }
            });
        } else {
            error!("REST server not started: node is not built");
        }
        self
    }

    /// Serves `dhcpha.HaService`; only when the peer talks gRPC.
    pub fn start_grpc_server(self) -> Self {
        if self.config.ha.protocol != PeerProtocol::Grpc {
            return self;
        }
        if let Some(ref node) = self.node {
            let api = HaApi::new(node.clone(), node.leases());
            let addr = self.config.server.grpc_addr();
            let network = self.config.network.clone();
            let shutdown = self.shutdown_signal.clone();
            tokio::spawn(async move {
                if let Err(e) = start_grpc_server(api, addr, &network, shutdown).await {
                    error!("gRPC server stops. {:?}", e);
                }
            });
        } else {
            error!("gRPC server not started: node is not built");
        }
        self
    }

    /// Returns the built node instance after successful construction.
    ///
    /// # Errors
    /// Returns `SystemError::NodeStartFailed` if build hasn't completed
    pub fn ready(self) -> Result<Arc<HaNode>> {
        self.node
            .ok_or_else(|| SystemError::NodeStartFailed("check node ready failed".to_string()).into())
    }
}

fn peer_port(config: &HaNodeConfig) -> u16 {
    match config.ha.protocol {
        PeerProtocol::Grpc => config.ha.peer_grpc_port,
        PeerProtocol::Rest => config.ha.peer_rest_port,
        PeerProtocol::Failover => config.ha.peer_failover_port,
    }
}

async fn default_transport(config: &HaNodeConfig) -> Result<Arc<dyn PeerTransport>> {
    let peer = SocketAddr::new(config.peer_ip()?, peer_port(config));
    let transport: Arc<dyn PeerTransport> = match config.ha.protocol {
        PeerProtocol::Grpc => Arc::new(GrpcPeerTransport::connect(peer, &config.network, &config.tls).await?),
        _ => Arc::new(RestPeerTransport::new(peer, &config.network)?),
    };
    Ok(transport)
}
