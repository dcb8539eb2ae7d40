use std::convert::Infallible;
use std::net::IpAddr;
use std::net::SocketAddr;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::reply::Response;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use super::HaApi;
use crate::encode_lease_line;
use crate::metrics_route;
use crate::DhcpLease;
use crate::Error;
use crate::LeaseError;
use crate::NetworkError;
use crate::Result;
use crate::SystemError;

#[derive(Debug, Deserialize)]
pub struct HaStateQuery {
    pub peerstate: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaseRangeQuery {
    pub start: Option<IpAddr>,
    pub end: Option<IpAddr>,
    /// `unsynced` or `all`
    pub haupdate: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaseUpdateQuery {
    #[serde(default)]
    pub haupdate: bool,
}

fn with_api(api: HaApi) -> impl Filter<Extract = (HaApi,), Error = Infallible> + Clone {
    warp::any().map(move || api.clone())
}

/// Every HA REST route plus `GET /metrics`.
pub fn ha_routes(api: HaApi) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let status = warp::path!("dhcpserverstatus")
        .and(warp::get())
        .and(with_api(api.clone()))
        .and_then(status_handler);

    let hastate = warp::path!("dhcpserverstatus" / "hastate")
        .and(warp::get())
        .and(warp::query::<HaStateQuery>())
        .and(warp::addr::remote())
        .and(with_api(api.clone()))
        .and_then(hastate_handler);

    let get_lease = warp::path!("dhcpleases" / IpAddr)
        .and(warp::get())
        .and(with_api(api.clone()))
        .and_then(get_lease_handler);

    let list_leases = warp::path!("dhcpleases")
        .and(warp::get())
        .and(warp::query::<LeaseRangeQuery>())
        .and(with_api(api.clone()))
        .and_then(list_leases_handler);

    let create_lease = warp::path!("dhcpleases")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_api(api.clone()))
        .and_then(create_lease_handler);

    let update_lease = warp::path!("dhcpleases" / IpAddr)
        .and(warp::put())
        .and(warp::query::<LeaseUpdateQuery>())
        .and(warp::body::json())
        .and(with_api(api.clone()))
        .and_then(update_lease_handler);

    let delete_lease = warp::path!("dhcpleases" / IpAddr)
        .and(warp::delete())
        .and(with_api(api))
        .and_then(delete_lease_handler);

    status
        .or(hastate)
        .or(get_lease)
        .or(list_leases)
        .or(create_lease)
        .or(update_lease)
        .or(delete_lease)
        .or(metrics_route())
}

/// Serves [`ha_routes`] on `addr` until `shutdown_signal` fires.
pub async fn start_rest_server(
    api: HaApi,
    addr: SocketAddr,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let (bound, server) = warp::serve(ha_routes(api))
        .try_bind_with_graceful_shutdown(
            addr,
            async move {
                let _ = shutdown_signal.changed().await;
                warn!("Stopping REST server. {}", addr);
            },
        )
        .map_err(|e| {
            error!("REST server can not bind {}: {:?}", addr, e);
            NetworkError::ServiceUnavailable(format!("REST server on {}", addr))
        })?;

    info!("REST server listening on {}", bound);
    server.await;
    debug!("REST server finished");
    Ok(())
}

fn error_reply(e: Error) -> Response {
    let status = match &e {
        Error::System(SystemError::Lease(LeaseError::NotFound(_))) => StatusCode::NOT_FOUND,
        Error::System(SystemError::Lease(LeaseError::AlreadyExists(_))) => StatusCode::CONFLICT,
        Error::System(SystemError::Lease(LeaseError::AddressChange { .. })) => StatusCode::BAD_REQUEST,
        _ => {
            error!("lease request failed: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    warp::reply::with_status(e.to_string(), status).into_response()
}

async fn status_handler(api: HaApi) -> std::result::Result<Response, Rejection> {
    if api.is_ready() {
        Ok(warp::reply::with_status("OK", StatusCode::OK).into_response())
    } else {
        Ok(warp::reply::with_status("NOT_READY", StatusCode::SERVICE_UNAVAILABLE).into_response())
    }
}

/// The caller's state doubles as a liveness signal and is applied to the
/// local FSM before we answer with our own.
async fn hastate_handler(
    query: HaStateQuery,
    remote: Option<SocketAddr>,
    api: HaApi,
) -> std::result::Result<Response, Rejection> {
    let peer_state = query.peerstate.unwrap_or_default();
    match api.exchange_state(remote, &peer_state).await {
        Ok(state) => Ok(state.name().into_response()),
        Err(e) => Ok(warp::reply::with_status(e.to_string(), StatusCode::FORBIDDEN).into_response()),
    }
}

async fn get_lease_handler(
    ip: IpAddr,
    api: HaApi,
) -> std::result::Result<Response, Rejection> {
    match api.find_lease(ip).await {
        Ok(Some(lease)) => Ok(warp::reply::json(&lease).into_response()),
        Ok(None) => Ok(error_reply(LeaseError::NotFound(ip).into())),
        Err(e) => Ok(error_reply(e)),
    }
}

/// Newline-delimited JSON, one lease per line.
async fn list_leases_handler(
    query: LeaseRangeQuery,
    api: HaApi,
) -> std::result::Result<Response, Rejection> {
    let (Some(start), Some(end)) = (query.start, query.end) else {
        return Ok(warp::reply::with_status("start and end are required", StatusCode::BAD_REQUEST).into_response());
    };
    let unsynced_only = match query.haupdate.as_deref() {
        None | Some("all") => false,
        Some("unsynced") => true,
        Some(other) => {
            return Ok(warp::reply::with_status(
                format!("unknown haupdate filter {}", other),
                StatusCode::BAD_REQUEST,
            )
            .into_response());
        }
    };

    let leases = match api.find_leases(start, end, unsynced_only).await {
        Ok(leases) => leases,
        Err(e) => return Ok(error_reply(e)),
    };
    debug!("streaming {} lease(s) in {} - {}", leases.len(), start, end);

    let lines = leases.into_iter().map(|lease| encode_lease_line(&lease));
    let mut response = Response::new(Body::wrap_stream(futures::stream::iter(lines)));
    response.headers_mut().insert(
        warp::http::header::CONTENT_TYPE,
        warp::http::HeaderValue::from_static("application/x-ndjson"),
    );
    Ok(response)
}

async fn create_lease_handler(
    lease: DhcpLease,
    api: HaApi,
) -> std::result::Result<Response, Rejection> {
    match api.create_lease(&lease).await {
        Ok(stored) => Ok(warp::reply::with_status(warp::reply::json(&stored), StatusCode::CREATED).into_response()),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn update_lease_handler(
    ip: IpAddr,
    query: LeaseUpdateQuery,
    lease: DhcpLease,
    api: HaApi,
) -> std::result::Result<Response, Rejection> {
    match api.update_lease(ip, &lease, query.haupdate).await {
        Ok(stored) => Ok(warp::reply::json(&stored).into_response()),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn delete_lease_handler(
    ip: IpAddr,
    api: HaApi,
) -> std::result::Result<Response, Rejection> {
    match api.delete_lease(ip).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Ok(error_reply(e)),
    }
}
