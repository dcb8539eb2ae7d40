//! `dhcpha.HaService` served over tonic, next to the standard health service.

use std::net::SocketAddr;
use std::pin::Pin;

use autometrics::autometrics;
use futures::FutureExt;
use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic::Streaming;
use tonic_health::server::health_reporter;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::HaApi;
use crate::decode_lease;
use crate::encode_lease;
use crate::proto::ha_service_server::HaService;
use crate::proto::ha_service_server::HaServiceServer;
use crate::proto::ip_from_bytes;
use crate::proto::HaStateReply;
use crate::proto::HaStateRequest;
use crate::proto::LeaseMessage;
use crate::proto::LeaseRangeRequest;
use crate::proto::StatusReply;
use crate::proto::StatusRequest;
use crate::NetworkConfig;
use crate::Result;
use crate::SystemError;
use crate::API_SLO;

type LeaseMessageStream = Pin<Box<dyn Stream<Item = std::result::Result<LeaseMessage, Status>> + Send>>;

const UPDATE_STREAM_BUFFER: usize = 32;

fn internal(e: crate::Error) -> Status {
    Status::internal(e.to_string())
}

#[tonic::async_trait]
impl HaService for HaApi {
    type StreamLeasesStream = LeaseMessageStream;
    type UpdateLeasesStream = LeaseMessageStream;

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    async fn get_status(
        &self,
        _request: Request<StatusRequest>,
    ) -> std::result::Result<Response<StatusReply>, Status> {
        let status = if self.is_ready() { "SERVING" } else { "NOT_SERVING" };
        Ok(Response::new(StatusReply {
            status: status.to_string(),
        }))
    }

    /// The caller sends its own state; the reply carries ours after the
    /// caller's state went through the FSM.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn get_ha_state(
        &self,
        request: Request<HaStateRequest>,
    ) -> std::result::Result<Response<HaStateReply>, Status> {
        if !self.is_ready() {
            warn!("[rpc|get_ha_state] node is not ready!");
            return Err(Status::unavailable("Service is not ready"));
        }
        let remote = request.remote_addr();
        let state = self
            .exchange_state(remote, &request.into_inner().peer_state)
            .await
            .map_err(|e| Status::permission_denied(e.to_string()))?;
        Ok(Response::new(HaStateReply {
            state: state.name().to_string(),
        }))
    }

    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    #[tracing::instrument(skip(self))]
    async fn stream_leases(
        &self,
        request: Request<LeaseRangeRequest>,
    ) -> std::result::Result<Response<Self::StreamLeasesStream>, Status> {
        let req = request.into_inner();
        let (Some(start), Some(end)) = (ip_from_bytes(&req.start_address), ip_from_bytes(&req.end_address)) else {
            return Err(Status::invalid_argument("start and end must be 4 or 16 address bytes"));
        };

        let leases = self
            .find_leases(start, end, req.unsynced_only)
            .await
            .map_err(internal)?;
        debug!("streaming {} lease(s) in {} - {}", leases.len(), start, end);

        let items: Vec<_> = leases
            .iter()
            .map(|lease| encode_lease(lease).map(|json| LeaseMessage { json }).map_err(internal))
            .collect();
        Ok(Response::new(futures::stream::iter(items).boxed()))
    }

    /// HA update: the peer's copy is stored as-is and echoed back.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    async fn update_lease(
        &self,
        request: Request<LeaseMessage>,
    ) -> std::result::Result<Response<LeaseMessage>, Status> {
        let lease = decode_lease(&request.into_inner().json)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let stored = HaApi::update_lease(self, lease.ip_address, &lease, true)
            .await
            .map_err(internal)?;
        let json = encode_lease(&stored).map_err(internal)?;
        Ok(Response::new(LeaseMessage { json }))
    }

    /// One stored copy per pushed lease, in order. A lease that can not be
    /// decoded or stored ends the stream with an error.
    #[cfg_attr(not(doc), autometrics(objective = API_SLO))]
    async fn update_leases(
        &self,
        request: Request<Streaming<LeaseMessage>>,
    ) -> std::result::Result<Response<Self::UpdateLeasesStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(UPDATE_STREAM_BUFFER);
        let api = self.clone();

        tokio::spawn(async move {
            while let Some(item) = inbound.next().await {
                let reply = match item {
                    Ok(msg) => api.store_pushed(&msg.json).await,
                    Err(status) => Err(status),
                };
                let failed = reply.is_err();
                if tx.send(reply).await.is_err() {
                    debug!("update_leases caller went away");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx).boxed()))
    }
}

impl HaApi {
    async fn store_pushed(
        &self,
        json: &str,
    ) -> std::result::Result<LeaseMessage, Status> {
        let lease = decode_lease(json).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let stored = HaApi::update_lease(self, lease.ip_address, &lease, true)
            .await
            .map_err(internal)?;
        encode_lease(&stored).map(|json| LeaseMessage { json }).map_err(internal)
    }
}

/// Serves `dhcpha.HaService` and the health service on `listen_address`
/// until `shutdown_signal` fires.
pub async fn start_grpc_server(
    api: HaApi,
    listen_address: SocketAddr,
    config: &NetworkConfig,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter.set_serving::<HaServiceServer<HaApi>>().await;

    if let Err(e) = Server::builder()
        .timeout(config.request_timeout())
        .tcp_keepalive(Some(config.tcp_keepalive()))
        .http2_keepalive_interval(Some(config.http2_keep_alive_interval()))
        .http2_keepalive_timeout(Some(config.http2_keep_alive_timeout()))
        .tcp_nodelay(config.tcp_nodelay)
        .add_service(health_service)
        .add_service(
            HaServiceServer::new(api)
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_shutdown(
            listen_address,
            shutdown_signal.changed().map(|_s| {
                warn!("Stopping gRPC server. {}", listen_address);
            }),
        )
        .await
    {
        error!("error to start gRPC server: {:?}.", e);
        return Err(SystemError::NodeStartFailed(format!("gRPC server on {}", listen_address)).into());
    }
    debug!("gRPC service finished!");
    Ok(())
}
