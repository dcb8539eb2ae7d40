use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics::LEASE_SYNC_RESULTS;
use crate::CountDownLatch;
use crate::LeaseManager;
use crate::LinkConfig;
use crate::LinkResolver;
use crate::PeerTransport;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSyncState {
    /// Never synced, or the last attempt failed.
    Pending,
    Syncing,
    Ok,
}

impl fmt::Display for LinkSyncState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LinkSyncState::Pending => "PENDING",
            LinkSyncState::Syncing => "SYNCING",
            LinkSyncState::Ok => "OK",
        };
        f.write_str(name)
    }
}

/// Pulls the peer's leases link by link and pushes the reconciled copies
/// back, so that both sides end up holding the same record marked synced.
///
/// Each link runs on its own task. A failing or slow link never holds up
/// another; callers that need to know when a pass is over wait on the
/// [`CountDownLatch`] returned by [`LeaseSyncPipeline::start`].
#[derive(Clone)]
pub struct LeaseSyncPipeline {
    transport: Arc<dyn PeerTransport>,
    leases: Arc<dyn LeaseManager>,
    links: LinkResolver,
    unsynced_only: bool,
    states: Arc<DashMap<String, LinkSyncState>>,
}

impl LeaseSyncPipeline {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        leases: Arc<dyn LeaseManager>,
        links: LinkResolver,
        unsynced_only: bool,
    ) -> Self {
        let states = DashMap::new();
        for link in links.links() {
            states.insert(link.name.clone(), LinkSyncState::Pending);
        }
        Self {
            transport,
            leases,
            links,
            unsynced_only,
            states: Arc::new(states),
        }
    }

    pub fn link_state(
        &self,
        name: &str,
    ) -> Option<LinkSyncState> {
        self.states.get(name).map(|s| *s)
    }

    pub fn link_states(&self) -> Vec<(String, LinkSyncState)> {
        let mut states: Vec<_> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Spawns one sync task per link. A link that is already syncing is
    /// left alone and counts down immediately.
    pub fn start(&self) -> Arc<CountDownLatch> {
        let links = self.links.links();
        let latch = Arc::new(CountDownLatch::new(links.len()));
        info!("starting lease sync for {} link(s)", links.len());

        for link in links.iter().cloned() {
            if !self.begin(&link.name) {
                debug!("link {} is already syncing", link.name);
                latch.count_down();
                continue;
            }

            let pipeline = self.clone();
            let latch = latch.clone();
            tokio::spawn(async move {
                pipeline.run_link(&link).await;
                latch.count_down();
            });
        }
        latch
    }

    /// Syncs every link and waits for all of them. Returns `true` if every
    /// link ended `Ok`.
    pub async fn sync_all(&self) -> bool {
        self.start().wait().await;
        self.states.iter().all(|entry| *entry.value() == LinkSyncState::Ok)
    }

    fn begin(
        &self,
        name: &str,
    ) -> bool {
        let mut state = self.states.entry(name.to_string()).or_insert(LinkSyncState::Pending);
        if *state == LinkSyncState::Syncing {
            return false;
        }
        *state = LinkSyncState::Syncing;
        true
    }

    async fn run_link(
        &self,
        link: &LinkConfig,
    ) {
        let started = Instant::now();
        match self.sync_link(link).await {
            Ok(count) => {
                self.states.insert(link.name.clone(), LinkSyncState::Ok);
                LEASE_SYNC_RESULTS.with_label_values(&[link.name.as_str(), "ok"]).inc();
                info!(
                    "link {} synced {} lease(s) in {:?}",
                    link.name,
                    count,
                    started.elapsed()
                );
            }
            Err(e) => {
                self.states.insert(link.name.clone(), LinkSyncState::Pending);
                LEASE_SYNC_RESULTS.with_label_values(&[link.name.as_str(), "failed"]).inc();
                error!(
                    "link {} sync failed after {:?}: {:?}",
                    link.name,
                    started.elapsed(),
                    e
                );
            }
        }
    }

    /// Streams the peer's leases for `link`, stores each one marked synced
    /// and pushes it back. Returns the number of leases applied.
    pub async fn sync_link(
        &self,
        link: &LinkConfig,
    ) -> Result<usize> {
        debug!(
            "syncing link {} ({} - {}), unsynced only: {}",
            link.name, link.start, link.end, self.unsynced_only
        );
        let mut stream = self
            .transport
            .stream_leases(link.start, link.end, self.unsynced_only)
            .await?;

        let mut count = 0usize;
        while let Some(item) = stream.next().await {
            let mut lease = item?;
            lease.mark_synced();
            self.leases.upsert_lease(&lease).await?;

            match self.transport.update_lease(&lease).await {
                Some(stored) if stored.same_lease(&lease) => {}
                Some(_) => {
                    warn!("peer stored a different copy of {}", lease.ip_address);
                    self.leases.set_ha_peer_state(lease.ip_address, None).await?;
                }
                None => {
                    warn!("peer did not confirm {}", lease.ip_address);
                    self.leases.set_ha_peer_state(lease.ip_address, None).await?;
                }
            }
            count += 1;
        }
        Ok(count)
    }
}
