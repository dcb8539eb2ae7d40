use std::sync::Once;

use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;
use tracing::warn;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref FAILOVER_MESSAGES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("failover_messages_received", "Inbound failover messages by type"),
        &["message_type"]
    )
    .expect("metric can not be created");

    pub static ref FAILOVER_MESSAGES_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("failover_messages_processed", "Failover messages handed to a processor"),
        &["message_type"]
    )
    .expect("metric can not be created");

    pub static ref FAILOVER_MESSAGES_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("failover_messages_rejected", "Dropped failover messages by reason"),
        &["message_type", "reason"]
    )
    .expect("metric can not be created");

    pub static ref FSM_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("fsm_transitions", "FSM transitions by target state"),
        &["role", "state"]
    )
    .expect("metric can not be created");

    pub static ref PEER_REACHABLE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("peer_reachable", "1 while the peer is believed reachable"),
        &["role"]
    )
    .expect("metric can not be created");

    pub static ref LEASE_SYNC_RESULTS: IntCounterVec = IntCounterVec::new(
        Opts::new("lease_sync_results", "Lease sync runs by link and result"),
        &["link", "result"]
    )
    .expect("metric can not be created");

    pub static ref LEASE_REPLICATION_RESULTS: IntCounterVec = IntCounterVec::new(
        Opts::new("lease_replication_results", "Per-lease replication calls by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: [Box<dyn prometheus::core::Collector>; 7] = [
        Box::new(FAILOVER_MESSAGES_RECEIVED.clone()),
        Box::new(FAILOVER_MESSAGES_PROCESSED.clone()),
        Box::new(FAILOVER_MESSAGES_REJECTED.clone()),
        Box::new(FSM_TRANSITIONS.clone()),
        Box::new(PEER_REACHABLE.clone()),
        Box::new(LEASE_SYNC_RESULTS.clone()),
        Box::new(LEASE_REPLICATION_RESULTS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {}", e);
        }
    }
}

/// Registers the HA collectors with the process registry, once.
pub fn init_metrics() {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));
}

/// `GET /metrics`
pub fn metrics_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("metrics").and(warp::get()).and_then(metrics_handler)
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_metrics())
}

/// Custom registry, default registry and autometrics output, concatenated.
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut body = String::new();

    for families in [REGISTRY.gather(), prometheus::gather()] {
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            error!("could not encode metrics: {}", e);
            continue;
        }
        match String::from_utf8(buffer) {
            Ok(text) => body.push_str(&text),
            Err(e) => error!("metrics could not be from_utf8'd: {}", e),
        }
    }

    body.push_str(&prometheus_exporter::encode_http_response().into_body());
    body
}
