use std::collections::VecDeque;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use super::LeaseStream;
use super::PeerTransport;
use crate::drain_lease_lines;
use crate::DhcpLease;
use crate::FsmState;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::Result;

/// [`PeerTransport`] over the peer's REST surface.
#[derive(Debug, Clone)]
pub struct RestPeerTransport {
    client: reqwest::Client,
    base_url: String,
    stream_timeout: Duration,
}

impl RestPeerTransport {
    pub fn new(
        peer: SocketAddr,
        settings: &NetworkConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .tcp_keepalive(settings.tcp_keepalive())
            .tcp_nodelay(settings.tcp_nodelay)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("http://{}", peer),
            stream_timeout: settings.stream_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<String> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NetworkError::UnexpectedStatus(response.status().as_u16()).into());
        }
        Ok(response.text().await?)
    }

    async fn put_lease(
        &self,
        lease: &DhcpLease,
    ) -> Result<DhcpLease> {
        let response = self
            .client
            .put(format!("{}/dhcpleases/{}", self.base_url, lease.ip_address))
            .query(&[("haupdate", "true")])
            .json(lease)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NetworkError::UnexpectedStatus(response.status().as_u16()).into());
        }
        Ok(response.json::<DhcpLease>().await?)
    }
}

#[async_trait]
impl PeerTransport for RestPeerTransport {
    async fn get_status(&self) -> Option<String> {
        match self.get_text("/dhcpserverstatus", &[]).await {
            Ok(status) => Some(status),
            Err(e) => {
                debug!("status probe to {} failed: {:?}", self.base_url, e);
                None
            }
        }
    }

    async fn get_peer_state(
        &self,
        own_state: FsmState,
    ) -> Option<FsmState> {
        let text = match self
            .get_text("/dhcpserverstatus/hastate", &[("peerstate", own_state.name())])
            .await
        {
            Ok(text) => text,
            Err(e) => {
                debug!("hastate request to {} failed: {:?}", self.base_url, e);
                return None;
            }
        };

        match text.parse::<FsmState>() {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("peer {} answered an unknown state: {}", self.base_url, e);
                None
            }
        }
    }

    async fn update_lease(
        &self,
        lease: &DhcpLease,
    ) -> Option<DhcpLease> {
        match self.put_lease(lease).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("lease update {} to {} failed: {:?}", lease.ip_address, self.base_url, e);
                None
            }
        }
    }

    /// No batch endpoint over REST: one PUT per lease, stopping at the
    /// first failure.
    async fn update_leases(
        &self,
        leases: &[DhcpLease],
    ) -> Option<Vec<DhcpLease>> {
        let mut stored = Vec::with_capacity(leases.len());
        for lease in leases {
            stored.push(self.update_lease(lease).await?);
        }
        Some(stored)
    }

    async fn stream_leases(
        &self,
        start: IpAddr,
        end: IpAddr,
        unsynced_only: bool,
    ) -> Result<LeaseStream> {
        let start = start.to_string();
        let end = end.to_string();
        let filter = if unsynced_only { "unsynced" } else { "all" };

        let response = self
            .client
            .get(format!("{}/dhcpleases", self.base_url))
            .query(&[("start", start.as_str()), ("end", end.as_str()), ("haupdate", filter)])
            .timeout(self.stream_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NetworkError::UnexpectedStatus(response.status().as_u16()).into());
        }

        Ok(ndjson_leases(response.bytes_stream()))
    }
}

struct NdjsonState<S> {
    chunks: S,
    buf: Vec<u8>,
    ready: VecDeque<DhcpLease>,
    done: bool,
}

/// Turns a chunked newline-delimited JSON body into a lease stream. A body
/// without a trailing newline still yields its last lease.
pub(crate) fn ndjson_leases<S, B>(chunks: S) -> LeaseStream
where
    S: futures::Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = NdjsonState {
        chunks: Box::pin(chunks),
        buf: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(lease) = state.ready.pop_front() {
                return Some((Ok(lease), state));
            }
            if state.done {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => state.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    state.buf.push(b'\n');
                }
            }

            match drain_lease_lines(&mut state.buf) {
                Ok(leases) => state.ready.extend(leases),
                Err(e) => {
                    state.done = true;
                    state.ready.clear();
                    return Some((Err(e), state));
                }
            }
        }
    })
    .boxed()
}
