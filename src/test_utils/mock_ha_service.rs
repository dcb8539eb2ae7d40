use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::codec::CompressionEncoding;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic::Streaming;
use tonic_health::server::health_reporter;
use tracing::debug;

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
use crate::LeaseManager;
use crate::MemLeaseManager;
use crate::Result;
use crate::StorageError;

type LeaseMessageStream = Pin<Box<dyn Stream<Item = std::result::Result<LeaseMessage, Status>> + Send>>;

/// Canned peer: answers every state exchange with `state` and serves leases
/// from an in-memory manager. Records the states callers sent.
pub struct MockHaService {
    pub state: Mutex<String>,
    pub leases: Arc<MemLeaseManager>,
    pub seen_states: Mutex<Vec<String>>,
}

impl MockHaService {
    pub fn new(
        state: &str,
        leases: Arc<MemLeaseManager>,
    ) -> Self {
        Self {
            state: Mutex::new(state.to_string()),
            leases,
            seen_states: Mutex::new(Vec::new()),
        }
    }
}

fn internal(e: crate::Error) -> Status {
    Status::internal(e.to_string())
}

#[tonic::async_trait]
impl HaService for MockHaService {
    type StreamLeasesStream = LeaseMessageStream;
    type UpdateLeasesStream = LeaseMessageStream;

    async fn get_status(
        &self,
        _request: Request<StatusRequest>,
    ) -> std::result::Result<Response<StatusReply>, Status> {
        Ok(Response::new(StatusReply {
            status: "SERVING".to_string(),
        }))
    }

    async fn get_ha_state(
        &self,
        request: Request<HaStateRequest>,
    ) -> std::result::Result<Response<HaStateReply>, Status> {
        self.seen_states.lock().push(request.into_inner().peer_state);
        Ok(Response::new(HaStateReply {
            state: self.state.lock().clone(),
        }))
    }

    async fn stream_leases(
        &self,
        request: Request<LeaseRangeRequest>,
    ) -> std::result::Result<Response<Self::StreamLeasesStream>, Status> {
        let req = request.into_inner();
        let (Some(start), Some(end)) = (ip_from_bytes(&req.start_address), ip_from_bytes(&req.end_address)) else {
            return Err(Status::invalid_argument("bad address range"));
        };
        let leases = self
            .leases
            .find_leases(start, end, req.unsynced_only)
            .await
            .map_err(internal)?;

        let items: Vec<std::result::Result<LeaseMessage, Status>> = leases
            .iter()
            .map(|lease| encode_lease(lease).map(|json| LeaseMessage { json }).map_err(internal))
            .collect();
        Ok(Response::new(futures::stream::iter(items).boxed()))
    }

    async fn update_lease(
        &self,
        request: Request<LeaseMessage>,
    ) -> std::result::Result<Response<LeaseMessage>, Status> {
        let lease = decode_lease(&request.into_inner().json).map_err(internal)?;
        let stored = self.leases.upsert_lease(&lease).await.map_err(internal)?;
        let json = encode_lease(&stored).map_err(internal)?;
        Ok(Response::new(LeaseMessage { json }))
    }

    async fn update_leases(
        &self,
        request: Request<Streaming<LeaseMessage>>,
    ) -> std::result::Result<Response<Self::UpdateLeasesStream>, Status> {
        let mut inbound = request.into_inner();
        let mut replies = Vec::new();
        while let Some(msg) = inbound.next().await {
            let lease = decode_lease(&msg?.json).map_err(internal)?;
            let stored = self.leases.upsert_lease(&lease).await.map_err(internal)?;
            replies.push(encode_lease(&stored).map(|json| LeaseMessage { json }).map_err(internal));
        }
        Ok(Response::new(futures::stream::iter(replies).boxed()))
    }
}

/// Serves `service` on an ephemeral loopback port until `rx` fires.
pub async fn mock_ha_listener(
    service: Arc<MockHaService>,
    rx: oneshot::Receiver<()>,
    is_ready: bool,
) -> Result<SocketAddr> {
    let (mut health_reporter, health_service) = health_reporter();
    if is_ready {
        health_reporter.set_serving::<HaServiceServer<MockHaService>>().await;
    } else {
        health_reporter.set_not_serving::<HaServiceServer<MockHaService>>().await;
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.map_err(StorageError::IoError)?;
    let addr = listener.local_addr().map_err(StorageError::IoError)?;
    debug!("starting mock ha service on {}", addr);

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(health_service)
            .add_service(
                HaServiceServer::from_arc(service)
                    .accept_compressed(CompressionEncoding::Gzip)
                    .send_compressed(CompressionEncoding::Gzip),
            )
            .serve_with_incoming_shutdown(tokio_stream::wrappers::TcpListenerStream::new(listener), async {
                rx.await.ok();
            })
            .await
            .unwrap();
    });

    Ok(addr)
}
