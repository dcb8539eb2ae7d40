use std::net::IpAddr;
use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Certificate;
use tonic::transport::Channel;
use tonic::transport::ClientTlsConfig;
use tonic::transport::Endpoint;
use tonic::transport::Identity;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::LeaseStream;
use super::PeerTransport;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::decode_lease;
use crate::encode_lease;
use crate::proto::ha_service_client::HaServiceClient;
use crate::proto::ip_to_bytes;
use crate::proto::HaStateRequest;
use crate::proto::LeaseMessage;
use crate::proto::LeaseRangeRequest;
use crate::DhcpLease;
use crate::Error;
use crate::FsmState;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::Result;
use crate::StorageError;
use crate::TlsConfig;

/// Service name registered with the health reporter.
pub const HA_SERVICE_NAME: &str = "dhcpha.HaService";

const CONNECT_RETRIES: usize = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// [`PeerTransport`] over the peer's `dhcpha.HaService`.
#[derive(Debug, Clone)]
pub struct GrpcPeerTransport {
    client: HaServiceClient<Channel>,
    health: HealthClient<Channel>,
    addr: String,
    stream_timeout: Duration,
}

impl GrpcPeerTransport {
    /// Connects eagerly, retrying with backoff. If the peer stays
    /// unreachable the transport is still returned, connecting lazily on
    /// first use, since the peer being down is a normal HA condition.
    pub async fn connect(
        peer: SocketAddr,
        settings: &NetworkConfig,
        tls: &TlsConfig,
    ) -> Result<Self> {
        let endpoint = endpoint(peer, settings, tls)?;
        let connect = || {
            let endpoint = endpoint.clone();
            async move { endpoint.connect().await.map_err(Error::from) }
        };

        let channel = match task_with_timeout_and_exponential_backoff(
            connect,
            CONNECT_RETRIES,
            CONNECT_BACKOFF,
            settings.connect_timeout(),
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!("peer {} not reachable yet, connecting lazily: {:?}", peer, e);
                endpoint.connect_lazy()
            }
        };

        Ok(Self::from_channel(channel, endpoint.uri().to_string(), settings.stream_timeout()))
    }

    pub fn from_channel(
        channel: Channel,
        addr: String,
        stream_timeout: Duration,
    ) -> Self {
        let client = HaServiceClient::new(channel.clone())
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
        let health = HealthClient::new(channel);
        Self {
            client,
            health,
            addr,
            stream_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Pushes `leases` over one `UpdateLeases` stream and returns the copies
    /// the peer stored, in order.
    async fn push_stream(
        &self,
        leases: &[DhcpLease],
    ) -> Result<Vec<DhcpLease>> {
        let messages = leases
            .iter()
            .map(|lease| encode_lease(lease).map(|json| LeaseMessage { json }))
            .collect::<Result<Vec<_>>>()?;

        let mut request = tonic::Request::new(futures::stream::iter(messages));
        request.set_timeout(self.stream_timeout);
        let mut replies = self.client.clone().update_leases(request).await?.into_inner();

        let mut stored = Vec::with_capacity(leases.len());
        while let Some(reply) = replies.next().await {
            stored.push(decode_lease(&reply?.json)?);
        }
        debug!("peer {} stored {} of {} pushed lease(s)", self.addr, stored.len(), leases.len());
        Ok(stored)
    }
}

fn endpoint(
    peer: SocketAddr,
    settings: &NetworkConfig,
    tls: &TlsConfig,
) -> Result<Endpoint> {
    let scheme = if tls.enable_tls { "https" } else { "http" };
    let addr = format!("{}://{}", scheme, peer);

    let mut endpoint = Endpoint::from_shared(addr.clone())
        .map_err(|_| NetworkError::InvalidURI(addr.clone()))?
        .connect_timeout(settings.connect_timeout())
        .timeout(settings.request_timeout())
        .tcp_keepalive(Some(settings.tcp_keepalive()))
        .tcp_nodelay(settings.tcp_nodelay)
        .http2_keep_alive_interval(settings.http2_keep_alive_interval())
        .keep_alive_timeout(settings.http2_keep_alive_timeout());

    if tls.enable_tls {
        endpoint = endpoint.tls_config(client_tls_config(tls)?)?;
    }
    Ok(endpoint)
}

fn client_tls_config(tls: &TlsConfig) -> Result<ClientTlsConfig> {
    let read = |path: &str| {
        std::fs::read(path).map_err(|source| StorageError::PathError {
            path: path.into(),
            source,
        })
    };

    let mut config = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(read(&tls.certificate_authority_root_path)?))
        .domain_name(tls.domain_name.clone());

    if tls.mtls_enabled() {
        let cert = read(&tls.client_certificate_path)?;
        let key = read(&tls.client_private_key_path)?;
        config = config.identity(Identity::from_pem(cert, key));
    }
    Ok(config)
}

#[async_trait]
impl PeerTransport for GrpcPeerTransport {
    async fn get_status(&self) -> Option<String> {
        let request = tonic::Request::new(HealthCheckRequest {
            service: HA_SERVICE_NAME.to_string(),
        });

        match self.health.clone().check(request).await {
            Ok(response) => {
                let status = ServingStatus::try_from(response.into_inner().status)
                    .unwrap_or(ServingStatus::Unknown);
                Some(status.as_str_name().to_string())
            }
            Err(status) => {
                debug!("health check to {} failed: {}", self.addr, status);
                None
            }
        }
    }

    async fn get_peer_state(
        &self,
        own_state: FsmState,
    ) -> Option<FsmState> {
        let request = HaStateRequest {
            peer_state: own_state.name().to_string(),
        };

        let reply = match self.client.clone().get_ha_state(request).await {
            Ok(reply) => reply.into_inner(),
            Err(status) => {
                debug!("GetHaState to {} failed: {}", self.addr, status);
                return None;
            }
        };

        match reply.state.parse::<FsmState>() {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("peer {} answered an unknown state: {}", self.addr, e);
                None
            }
        }
    }

    async fn update_lease(
        &self,
        lease: &DhcpLease,
    ) -> Option<DhcpLease> {
        let json = match encode_lease(lease) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to encode lease {}: {:?}", lease.ip_address, e);
                return None;
            }
        };

        let reply = match self.client.clone().update_lease(LeaseMessage { json }).await {
            Ok(reply) => reply.into_inner(),
            Err(status) => {
                warn!("UpdateLease {} to {} failed: {}", lease.ip_address, self.addr, status);
                return None;
            }
        };

        match decode_lease(&reply.json) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("peer {} echoed an unreadable lease: {:?}", self.addr, e);
                None
            }
        }
    }

    async fn update_leases(
        &self,
        leases: &[DhcpLease],
    ) -> Option<Vec<DhcpLease>> {
        match self.push_stream(leases).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("UpdateLeases of {} lease(s) to {} failed: {:?}", leases.len(), self.addr, e);
                None
            }
        }
    }

    async fn stream_leases(
        &self,
        start: IpAddr,
        end: IpAddr,
        unsynced_only: bool,
    ) -> Result<LeaseStream> {
        let mut request = tonic::Request::new(LeaseRangeRequest {
            start_address: ip_to_bytes(start),
            end_address: ip_to_bytes(end),
            unsynced_only,
        });
        request.set_timeout(self.stream_timeout);

        let stream = self.client.clone().stream_leases(request).await?.into_inner();
        Ok(stream
            .map(|item| item.map_err(Error::from).and_then(|msg| decode_lease(&msg.json)))
            .boxed())
    }
}
