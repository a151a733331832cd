//! Query resolution over the inventory cache.
//!
//! Forward names are synthesized per query: for every Node interface the
//! zone yields a pattern name (`nid0001.cluster.local`) and an xname name
//! (`x3000c0s0b0n0.cluster.local`); BMCs are reachable by xname only.
//! Reverse queries decode the arpa name and scan the interface IP lists.

use crate::zones::Zone;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::{A, AAAA, PTR};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use smd_inventory::{hostname, rdns, Cache, Snapshot};
use smd_client::EthernetInterface;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// TTL for every synthesized record.
const RECORD_TTL: u32 = 60;

/// Counters for one record type.
#[derive(Debug, Default)]
pub struct TypeCounters {
    pub requests: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

/// Lookup counters, labeled by record type the way the answers are.
/// Plain atomics; scraping them is the host's business.
#[derive(Debug, Default)]
pub struct LookupMetrics {
    pub a: TypeCounters,
    pub aaaa: TypeCounters,
    pub ptr: TypeCounters,
    pub other: TypeCounters,
}

impl LookupMetrics {
    fn for_type(&self, qtype: RecordType) -> &TypeCounters {
        match qtype {
            RecordType::A => &self.a,
            RecordType::AAAA => &self.aaaa,
            RecordType::PTR => &self.ptr,
            _ => &self.other,
        }
    }

    fn count_request(&self, qtype: RecordType) {
        self.for_type(qtype).requests.fetch_add(1, Ordering::Relaxed);
    }
    fn count_hit(&self, qtype: RecordType) {
        self.for_type(qtype).hits.fetch_add(1, Ordering::Relaxed);
    }
    fn count_miss(&self, qtype: RecordType) {
        self.for_type(qtype).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Totals across every record type, as (requests, hits, misses).
    pub fn totals(&self) -> (u64, u64, u64) {
        let mut totals = (0, 0, 0);
        for counters in [&self.a, &self.aaaa, &self.ptr, &self.other] {
            totals.0 += counters.requests.load(Ordering::Relaxed);
            totals.1 += counters.hits.load(Ordering::Relaxed);
            totals.2 += counters.misses.load(Ordering::Relaxed);
        }
        totals
    }
}

/// A DNS handler: answers a request or declines it.
///
/// Handlers chain one hop deep; a miss forwards to the successor when one
/// is installed.
#[async_trait::async_trait]
pub trait ServeDns: Send + Sync {
    async fn serve(&self, req: &Message) -> Option<Message>;
}

/// Cache-backed authoritative handler.
pub struct CoresmdDns {
    cache: Arc<Cache>,
    zones: Vec<Zone>,
    metrics: LookupMetrics,
    next: Option<Box<dyn ServeDns>>,
}

impl CoresmdDns {
    pub fn new(cache: Arc<Cache>, zones: Vec<Zone>) -> Self {
        Self {
            cache,
            zones,
            metrics: LookupMetrics::default(),
            next: None,
        }
    }

    /// Install the successor consulted on misses.
    pub fn with_next(mut self, next: Box<dyn ServeDns>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn metrics(&self) -> &LookupMetrics {
        &self.metrics
    }

    async fn lookup_a(&self, name: &str) -> Option<Ipv4Addr> {
        let snapshot = self.cache.read().await;
        match self.find_forward(&snapshot, name, first_ip_of(is_v4)) {
            Some(IpAddr::V4(ip)) => Some(ip),
            _ => None,
        }
    }

    async fn lookup_aaaa(&self, name: &str) -> Option<Ipv6Addr> {
        let snapshot = self.cache.read().await;
        match self.find_forward(&snapshot, name, first_ip_of(is_v6)) {
            Some(IpAddr::V6(ip)) => Some(ip),
            _ => None,
        }
    }

    /// Forward resolution shared by A and AAAA; `pick` applies the address
    /// family filter.
    fn find_forward(
        &self,
        snapshot: &Snapshot,
        name: &str,
        pick: impl Fn(&EthernetInterface) -> Option<IpAddr>,
    ) -> Option<IpAddr> {
        for zone in &self.zones {
            if !zone.matches(name) {
                continue;
            }
            // nodes answer by pattern name or xname
            for ei in snapshot.ethernet_interfaces.values() {
                let Some(comp) = snapshot.components.get(&ei.component_id) else {
                    continue;
                };
                if comp.kind != "Node" {
                    continue;
                }
                let xname_fqdn = zone.fqdn(&comp.id.to_lowercase());
                let nid_host =
                    hostname::expand(&zone.node_pattern, comp.nid, &comp.id).to_lowercase();
                let nid_fqdn = zone.fqdn(&nid_host);
                if name == nid_fqdn || name == xname_fqdn {
                    if let Some(ip) = pick(ei) {
                        return Some(ip);
                    }
                }
            }
            // BMCs are always addressable by xname, whatever the pattern
            for ei in snapshot.ethernet_interfaces.values() {
                let Some(comp) = snapshot.components.get(&ei.component_id) else {
                    continue;
                };
                if comp.kind != "NodeBMC" {
                    continue;
                }
                if name == zone.fqdn(&comp.id.to_lowercase()) {
                    if let Some(ip) = pick(ei) {
                        return Some(ip);
                    }
                }
            }
        }
        None
    }

    async fn lookup_ptr(&self, name: &str) -> Option<String> {
        let ip = rdns::reverse_to_ip(name)?;
        let snapshot = self.cache.read().await;
        for ei in snapshot.ethernet_interfaces.values() {
            let found = ei
                .ip_addresses
                .iter()
                .any(|entry| entry.ip_address.parse::<IpAddr>().ok() == Some(ip));
            if !found {
                continue;
            }
            let Some(comp) = snapshot.components.get(&ei.component_id) else {
                continue;
            };
            // the xname form is unambiguous per component; the first zone
            // provides the suffix
            let zone = self.zones.first()?;
            return Some(zone.fqdn(&comp.id));
        }
        None
    }
}

fn is_v4(ip: &IpAddr) -> bool {
    ip.is_ipv4()
}

fn is_v6(ip: &IpAddr) -> bool {
    ip.is_ipv6()
}

/// First address of the wanted family in an interface's ordered IP list.
fn first_ip_of(
    family: impl Fn(&IpAddr) -> bool,
) -> impl Fn(&EthernetInterface) -> Option<IpAddr> {
    move |ei| {
        ei.ip_addresses
            .iter()
            .filter_map(|entry| entry.ip_address.parse::<IpAddr>().ok())
            .find(|ip| family(ip))
    }
}

/// Build the authoritative answer for one query.
fn authoritative_reply(req: &Message, query: &Query, rdata: RData) -> Message {
    let mut msg = Message::new();
    msg.set_id(req.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_authoritative(true)
        .set_recursion_desired(req.recursion_desired());
    msg.add_query(query.clone());
    msg.add_answer(Record::from_rdata(query.name().clone(), RECORD_TTL, rdata));
    msg
}

#[async_trait::async_trait]
impl ServeDns for CoresmdDns {
    async fn serve(&self, req: &Message) -> Option<Message> {
        let Some(query) = req.queries().first().cloned() else {
            debug!("request without a question, passing through");
            return match &self.next {
                Some(next) => next.serve(req).await,
                None => None,
            };
        };

        self.metrics.count_request(query.query_type());
        let qname = query.name().to_utf8().trim_end_matches('.').to_lowercase();

        let answer = match query.query_type() {
            RecordType::A => self.lookup_a(&qname).await.map(|ip| RData::A(A(ip))),
            RecordType::AAAA => self
                .lookup_aaaa(&qname)
                .await
                .map(|ip| RData::AAAA(AAAA(ip))),
            RecordType::PTR => match self.lookup_ptr(&qname).await {
                Some(target) => match Name::from_utf8(format!("{target}.")) {
                    Ok(name) => Some(RData::PTR(PTR(name))),
                    Err(err) => {
                        warn!("synthesized PTR target '{target}' is not a valid name: {err}");
                        None
                    }
                },
                None => None,
            },
            _ => None,
        };

        match answer {
            Some(rdata) => {
                debug!("lookup succeeded: {qname} ({})", query.query_type());
                self.metrics.count_hit(query.query_type());
                Some(authoritative_reply(req, &query, rdata))
            }
            None => {
                debug!(
                    "cache miss for {qname} ({}), passing to next handler",
                    query.query_type()
                );
                self.metrics.count_miss(query.query_type());
                match &self.next {
                    Some(next) => next.serve(req).await,
                    None => None,
                }
            }
        }
    }
}
