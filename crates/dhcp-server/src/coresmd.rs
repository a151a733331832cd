//! SMD-driven DHCPv4 handler.
//!
//! Binds known MACs to their pre-provisioned IP out of the inventory cache
//! and drives the two-stage iPXE boot: vendor PXE ROMs are chainloaded into
//! an iPXE binary over TFTP, running iPXE clients are pointed at the HTTP
//! bootscript endpoint. Anything the cache cannot place is passed to the
//! next handler untouched.

use crate::config::CoresmdConfig;
use crate::handler::{Handler4, Outcome};
use crate::ipxe;
use crate::options;
use dhcproto::v4::{DhcpOption, Message};
use smd_inventory::{hostname, Cache, Snapshot};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

/// Everything the handler needs to know about one interface, resolved
/// across the two cache maps.
#[derive(Debug)]
pub(crate) struct IfaceInfo {
    pub component_id: String,
    pub nid: i64,
    pub kind: String,
    pub ips: Vec<IpAddr>,
}

#[derive(Debug, Error)]
pub(crate) enum LookupError {
    #[error("no EthernetInterface found in cache for hardware address {0}")]
    UnknownMac(String),

    #[error("no Component {component_id} found in cache for EthernetInterface hardware address {mac}")]
    UnknownComponent { mac: String, component_id: String },

    #[error(
        "EthernetInterface for Component {component_id} (type {kind}) contains no IP addresses \
         for hardware address {mac}"
    )]
    NoAddresses {
        mac: String,
        component_id: String,
        kind: String,
    },
}

/// Resolve a MAC through EthernetInterfaces and Components.
pub(crate) fn lookup_mac(snapshot: &Snapshot, mac: &str) -> Result<IfaceInfo, LookupError> {
    let ei = snapshot
        .ethernet_interfaces
        .get(mac)
        .ok_or_else(|| LookupError::UnknownMac(mac.to_string()))?;

    debug!(
        "EthernetInterface found in cache for hardware address {mac} with ID {}",
        ei.component_id
    );
    let comp = snapshot.components.get(&ei.component_id).ok_or_else(|| {
        LookupError::UnknownComponent {
            mac: mac.to_string(),
            component_id: ei.component_id.clone(),
        }
    })?;

    if ei.ip_addresses.is_empty() {
        return Err(LookupError::NoAddresses {
            mac: mac.to_string(),
            component_id: comp.id.clone(),
            kind: comp.kind.clone(),
        });
    }

    let ips = ei
        .ip_addresses
        .iter()
        .filter_map(|entry| entry.ip_address.parse().ok())
        .collect();

    Ok(IfaceInfo {
        component_id: comp.id.clone(),
        nid: comp.nid,
        kind: comp.kind.clone(),
        ips,
    })
}

/// The stage-2 bootscript URL for a MAC.
pub(crate) fn bootscript_url(base: &Url, mac: &str) -> String {
    format!(
        "{}/boot/v1/bootscript?mac={mac}",
        base.as_str().trim_end_matches('/')
    )
}

/// SMD-driven DHCPv4 handler.
pub struct CoresmdHandler {
    cache: Arc<Cache>,
    config: CoresmdConfig,
}

impl CoresmdHandler {
    pub fn new(cache: Arc<Cache>, config: CoresmdConfig) -> Self {
        Self { cache, config }
    }

    /// Expand the hostname for a component, suffixed with the configured
    /// domain when there is one. Component types without a pattern get no
    /// hostname.
    fn hostname_for(&self, info: &IfaceInfo) -> Option<String> {
        let pattern = match info.kind.as_str() {
            "Node" => &self.config.node_pattern,
            "NodeBMC" => &self.config.bmc_pattern,
            _ => return None,
        };
        let mut name = hostname::expand(pattern, info.nid, &info.component_id);
        if let Some(domain) = &self.config.domain {
            name = format!("{name}.{domain}");
        }
        Some(name)
    }

    /// Stage dispatch on the user-class option: running iPXE clients get
    /// the bootscript URL, everything else gets a chainload bootfile.
    fn set_boot_options(&self, req: &Message, resp: &mut Message, mac: &str) {
        if options::is_ipxe(req) {
            let url = bootscript_url(&self.config.ipxe_base_uri, mac);
            resp.opts_mut().insert(DhcpOption::BootfileName(url.into_bytes()));
        } else {
            ipxe::serve_bootloader(req, resp);
        }
    }

    /// BMC discovery fallback: a MAC with no EthernetInterface record may
    /// still be a known Redfish endpoint.
    fn redfish_fallback(
        &self,
        snapshot: &Snapshot,
        mac: &str,
        mut resp: Message,
    ) -> Outcome<Message> {
        let Some(endpoint) = snapshot.redfish_endpoints.get(mac) else {
            return Outcome::Pass(resp);
        };
        let Ok(ip) = endpoint.ip_addr.parse::<Ipv4Addr>() else {
            error!(
                "RedfishEndpoint for {mac} has unusable IP '{}'",
                endpoint.ip_addr
            );
            return Outcome::Pass(resp);
        };

        info!("assigning IP {ip} to Redfish endpoint {mac}");
        resp.set_yiaddr(ip);
        let server_ip = resp.siaddr();
        resp.opts_mut()
            .insert(DhcpOption::AddressLeaseTime(lease_secs(&self.config)));
        resp.opts_mut()
            .insert(DhcpOption::RootPath(server_ip.to_string()));
        Outcome::Respond(resp)
    }
}

fn lease_secs(config: &CoresmdConfig) -> u32 {
    config.lease_time.as_secs().min(u32::MAX as u64) as u32
}

fn first_ipv4(ips: &[IpAddr]) -> Option<Ipv4Addr> {
    ips.iter().find_map(|ip| match ip {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(_) => None,
    })
}

#[async_trait::async_trait]
impl Handler4 for CoresmdHandler {
    async fn handle(&self, req: &Message, mut resp: Message) -> Outcome<Message> {
        debug!("REQUEST: {}", crate::debug::summarize_v4(req));
        let Some(mac) = options::client_mac(req) else {
            debug!("request without an Ethernet hardware address, passing through");
            return Outcome::Pass(resp);
        };

        let snapshot = self.cache.read().await;

        let info = match lookup_mac(&snapshot, &mac) {
            Ok(info) => info,
            Err(err @ LookupError::UnknownMac(_)) => {
                debug!("IP lookup failed: {err}");
                return self.redfish_fallback(&snapshot, &mac, resp);
            }
            Err(err) => {
                error!("IP lookup failed: {err}");
                return Outcome::Pass(resp);
            }
        };

        let Some(assigned) = first_ipv4(&info.ips) else {
            error!(
                "no IPv4 address available for hardware address {mac} (Component {})",
                info.component_id
            );
            return Outcome::Pass(resp);
        };
        drop(snapshot);

        resp.set_yiaddr(assigned);
        resp.opts_mut()
            .insert(DhcpOption::AddressLeaseTime(lease_secs(&self.config)));

        let hostname = self.hostname_for(&info);
        if let Some(name) = &hostname {
            debug!("setting hostname for {} to {name}", info.component_id);
            resp.opts_mut().insert(DhcpOption::Hostname(name.clone()));
        }

        info!(
            "assigning IP {assigned} and hostname {} to {mac} ({}) with a lease duration of {}",
            hostname.as_deref().unwrap_or("(none)"),
            info.kind,
            humantime::format_duration(self.config.lease_time)
        );

        let server_ip = resp.siaddr();
        resp.opts_mut()
            .insert(DhcpOption::RootPath(server_ip.to_string()));

        self.set_boot_options(req, &mut resp, &mac);

        debug!("RESPONSE: {}", crate::debug::summarize_v4(&resp));
        Outcome::Respond(resp)
    }
}
