//! Periodically refreshed snapshot of the SMD inventory.
//!
//! The refresher fetches three collections, rebuilds the indexed maps off to
//! the side, and swaps them in together with the timestamp under the writer
//! lock. Readers therefore never observe a half-updated snapshot: whoever
//! sees the new `last_updated` sees the matching maps.

use crate::error::InventoryError;
use chrono::{DateTime, Utc};
use smd_client::{Component, EthernetInterface, RedfishEndpoint, SmdApi, SmdError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info};

/// A cache older than this is no longer considered ready to serve.
pub const READINESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// One coherent view of the SMD inventory.
///
/// MAC-keyed maps use canonical lowercase colon-separated keys.
/// `last_updated = None` means no refresh has completed yet.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub ethernet_interfaces: HashMap<String, EthernetInterface>,
    pub components: HashMap<String, Component>,
    pub redfish_endpoints: HashMap<String, RedfishEndpoint>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Shared inventory cache.
///
/// Create once at process start, hand `Arc<Cache>` to every handler, and
/// spawn [`Cache::refresh_loop`] on the runtime.
pub struct Cache {
    client: Arc<dyn SmdApi>,
    duration: Duration,
    fetch_redfish: bool,
    snapshot: RwLock<Snapshot>,
}

impl Cache {
    /// Create a new cache that refreshes every `duration`.
    ///
    /// `duration` uses humantime syntax ("30s", "5m"). Parsing failures are
    /// fatal; a zero duration is accepted and means "refresh once, then
    /// never again".
    pub fn new(duration: &str, client: Arc<dyn SmdApi>) -> Result<Self, InventoryError> {
        let cache_duration =
            humantime::parse_duration(duration).map_err(|e| InventoryError::InvalidDuration {
                value: duration.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            duration: cache_duration,
            fetch_redfish: true,
            snapshot: RwLock::new(Snapshot::default()),
        })
    }

    /// Disable the RedfishEndpoints fetch for SMDs that do not serve it.
    pub fn without_redfish(mut self) -> Self {
        self.fetch_redfish = false;
        self
    }

    /// The configured refresh period.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Take a read guard on the current snapshot.
    ///
    /// Handlers hold this for the duration of one request and must not do
    /// blocking I/O while it is held.
    pub async fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().await
    }

    /// Fetch all collections and atomically publish a new snapshot.
    ///
    /// Any fetch or unmarshal error aborts the refresh and leaves the
    /// previous snapshot untouched.
    pub async fn refresh(&self) -> Result<(), InventoryError> {
        info!("initiating cache refresh");

        debug!("fetching EthernetInterfaces");
        let interfaces = self
            .client
            .fetch_ethernet_interfaces()
            .await
            .map_err(inventory_err("EthernetInterfaces"))?;
        debug!("fetching Components");
        let components = self
            .client
            .fetch_components()
            .await
            .map_err(inventory_err("Components"))?;
        let redfish = if self.fetch_redfish {
            debug!("fetching RedfishEndpoints");
            self.client
                .fetch_redfish_endpoints()
                .await
                .map_err(inventory_err("RedfishEndpoints"))?
        } else {
            Vec::new()
        };

        let mut eth_map = HashMap::with_capacity(interfaces.len());
        for ei in interfaces {
            eth_map.insert(ei.mac_address.to_lowercase(), ei);
        }
        let mut comp_map = HashMap::with_capacity(components.len());
        for comp in components {
            comp_map.insert(comp.id.clone(), comp);
        }
        let mut redfish_map = HashMap::with_capacity(redfish.len());
        for ep in redfish {
            redfish_map.insert(ep.mac_addr.to_lowercase(), ep);
        }

        let (n_eth, n_comp, n_redfish) = (eth_map.len(), comp_map.len(), redfish_map.len());

        // Publish everything together; readers key consistency off
        // last_updated.
        {
            let mut guard = self.snapshot.write().await;
            guard.ethernet_interfaces = eth_map;
            guard.components = comp_map;
            guard.redfish_endpoints = redfish_map;
            guard.last_updated = Some(Utc::now());
        }

        info!(
            "cache updated with {n_eth} EthernetInterfaces, {n_comp} Components, \
             {n_redfish} RedfishEndpoints"
        );
        Ok(())
    }

    /// Run the refresher: one initial refresh (failure logged, not fatal),
    /// then one refresh per configured period until the process exits.
    pub async fn refresh_loop(self: Arc<Self>) {
        info!(
            "initiating cache refresh loop, refreshing every {}",
            humantime::format_duration(self.duration)
        );

        if let Err(err) = self.refresh().await {
            error!("failed to refresh cache: {err}");
        }

        if self.duration.is_zero() {
            // nothing sensible to tick on
            return;
        }

        let mut ticker = tokio::time::interval(self.duration);
        ticker.tick().await; // the first tick completes immediately
        loop {
            ticker.tick().await;
            if let Err(err) = self.refresh().await {
                error!("failed to refresh cache: {err}");
            }
        }
    }

    /// Whether the cache can serve lookups.
    ///
    /// Ready means: refreshed at least once, within [`READINESS_WINDOW`],
    /// and at least one map has content.
    pub async fn ready(&self) -> bool {
        let guard = self.snapshot.read().await;
        snapshot_ready(&guard, Utc::now())
    }

    /// Time since the last successful refresh, if any.
    pub async fn age(&self) -> Option<Duration> {
        let guard = self.snapshot.read().await;
        let last_updated = guard.last_updated?;
        Utc::now()
            .signed_duration_since(last_updated)
            .to_std()
            .ok()
    }

    /// Current map sizes as (interfaces, components, redfish endpoints).
    pub async fn sizes(&self) -> (usize, usize, usize) {
        let guard = self.snapshot.read().await;
        (
            guard.ethernet_interfaces.len(),
            guard.components.len(),
            guard.redfish_endpoints.len(),
        )
    }
}

/// Split client failures back into the fetch/unmarshal taxonomy: a decode
/// failure means SMD answered with something unusable, anything else means
/// it did not answer at all.
fn inventory_err(collection: &'static str) -> impl Fn(SmdError) -> InventoryError {
    move |err| match err {
        SmdError::Decode { collection, source } => {
            InventoryError::Unmarshal { collection, source }
        }
        source => InventoryError::Fetch { collection, source },
    }
}

/// The readiness rule, parameterized over "now" so the window is testable.
pub(crate) fn snapshot_ready(snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
    let Some(last_updated) = snapshot.last_updated else {
        return false;
    };
    let age = now.signed_duration_since(last_updated);
    if age.to_std().map_or(true, |age| age > READINESS_WINDOW) {
        return false;
    }
    !snapshot.ethernet_interfaces.is_empty()
        || !snapshot.components.is_empty()
        || !snapshot.redfish_endpoints.is_empty()
}
