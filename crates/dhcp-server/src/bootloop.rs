//! Dynamic-lease DHCPv4 handler for hosts not (yet) in SMD.
//!
//! Unknown MACs get a short lease from a configured range so they can run
//! the discovery ramdisk; once a host shows up in SMD, the next non-iPXE
//! request from it is NAKed to force a fresh handshake, which gives the
//! SMD-driven handler the chance to bind it to its real address.
//!
//! The whole handler runs under one mutex covering the record map, the
//! allocator, and the backing store. Persistence happens while it is held,
//! which bounds request latency on purpose: the map and the file never
//! disagree within a request.

use crate::allocator::BitmapAllocator;
use crate::config::{split_arg, trim_quotes, ConfigError, ConfigFailure};
use crate::error::DhcpError;
use crate::handler::{Handler4, Handler6, Outcome};
use crate::ipxe;
use crate::options;
use crate::storage::{LeaseRecord, LeaseStore};
use chrono::Utc;
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BOOTLOOP_LEASE_TIME: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SCRIPT_PATH: &str = "default";

/// Parsed-but-unvalidated bootloop configuration.
#[derive(Debug, Default)]
pub struct BootloopArgs {
    pub lease_file: Option<String>,
    pub script_path: Option<String>,
    pub lease_time: Option<Duration>,
    pub ipv4_start: Option<Ipv4Addr>,
    pub ipv4_end: Option<Ipv4Addr>,
}

/// Validated bootloop configuration.
#[derive(Debug, Clone)]
pub struct BootloopConfig {
    pub lease_file: String,
    pub script_path: String,
    pub lease_time: Duration,
    pub ipv4_start: Ipv4Addr,
    pub ipv4_end: Ipv4Addr,
}

impl BootloopConfig {
    /// Number of addresses in the configured range.
    pub fn range_size(&self) -> u32 {
        u32::from(self.ipv4_end) - u32::from(self.ipv4_start) + 1
    }
}

impl fmt::Display for BootloopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lease_file={} script_path={} lease_time={} ipv4_start={} ipv4_end={} ipv4_range={}",
            self.lease_file,
            self.script_path,
            humantime::format_duration(self.lease_time),
            self.ipv4_start,
            self.ipv4_end,
            self.range_size(),
        )
    }
}

impl BootloopArgs {
    /// Parse an ordered sequence of `key=value` arguments.
    pub fn parse(argv: &[String]) -> (Self, Vec<ConfigError>) {
        let mut cfg = Self::default();
        let mut errs = Vec::new();

        for (idx, arg) in argv.iter().enumerate() {
            let Some((key, value)) = split_arg(idx, arg, &mut errs) else {
                continue;
            };
            let invalid = |reason: String| ConfigError::InvalidValue {
                idx,
                key: key.to_string(),
                value: value.to_string(),
                reason,
            };
            match key {
                "lease_file" => {
                    let path = trim_quotes(value);
                    if path.is_empty() {
                        errs.push(invalid("empty".to_string()));
                    } else {
                        cfg.lease_file = Some(path.to_string());
                    }
                }
                "script_path" => {
                    let path = trim_quotes(value);
                    if path.is_empty() {
                        errs.push(invalid("empty (setting to default script)".to_string()));
                        cfg.script_path = Some(DEFAULT_SCRIPT_PATH.to_string());
                    } else {
                        cfg.script_path = Some(path.to_string());
                    }
                }
                "lease_time" => match humantime::parse_duration(value) {
                    Ok(d) => cfg.lease_time = Some(d),
                    Err(e) => errs.push(invalid(e.to_string())),
                },
                "ipv4_start" => match value.parse::<Ipv4Addr>() {
                    Ok(ip) => cfg.ipv4_start = Some(ip),
                    Err(_) => errs.push(invalid("invalid ip address".to_string())),
                },
                "ipv4_end" => match value.parse::<Ipv4Addr>() {
                    Ok(ip) => cfg.ipv4_end = Some(ip),
                    Err(_) => errs.push(invalid("invalid ip address".to_string())),
                },
                _ => errs.push(ConfigError::UnknownKey {
                    idx,
                    key: key.to_string(),
                }),
            }
        }
        (cfg, errs)
    }

    /// Check invariants and apply defaults.
    pub fn validate(self) -> Result<(BootloopConfig, Vec<String>), ConfigFailure> {
        let mut warns = Vec::new();
        let mut errs = Vec::new();

        if self.lease_file.is_none() {
            errs.push(ConfigError::Required { key: "lease_file" });
        }
        match (self.ipv4_start, self.ipv4_end) {
            (None, _) | (_, None) => {
                if self.ipv4_start.is_none() {
                    errs.push(ConfigError::Required { key: "ipv4_start" });
                }
                if self.ipv4_end.is_none() {
                    errs.push(ConfigError::Required { key: "ipv4_end" });
                }
            }
            (Some(start), Some(end)) => {
                if u32::from(start) > u32::from(end) {
                    errs.push(ConfigError::InvalidValue {
                        idx: 0,
                        key: "ipv4_end".to_string(),
                        value: end.to_string(),
                        reason: format!(
                            "invalid range: ipv4_end must be equal to or higher than \
                             ipv4_start ({start})"
                        ),
                    });
                }
            }
        }
        let lease_time = self.lease_time.unwrap_or_else(|| {
            warns.push(format!(
                "lease_time unset, defaulting to {}",
                humantime::format_duration(DEFAULT_BOOTLOOP_LEASE_TIME)
            ));
            DEFAULT_BOOTLOOP_LEASE_TIME
        });
        let script_path = self.script_path.unwrap_or_else(|| {
            warns.push("script_path unset, using default".to_string());
            DEFAULT_SCRIPT_PATH.to_string()
        });

        if !errs.is_empty() {
            return Err(ConfigFailure {
                warnings: warns,
                errors: errs,
            });
        }

        Ok((
            BootloopConfig {
                lease_file: self.lease_file.expect("checked above"),
                script_path,
                lease_time,
                ipv4_start: self.ipv4_start.expect("checked above"),
                ipv4_end: self.ipv4_end.expect("checked above"),
            },
            warns,
        ))
    }
}

/// Everything the handler mutates, under one lock.
#[derive(Debug)]
struct State {
    records: HashMap<String, LeaseRecord>,
    allocator: BitmapAllocator,
    store: Option<LeaseStore>,
}

impl State {
    /// Install the backing store. There is no hot-swap: a second
    /// registration is an error.
    fn register_backing(&mut self, store: LeaseStore) -> Result<(), DhcpError> {
        if self.store.is_some() {
            return Err(DhcpError::BackingAlreadyRegistered);
        }
        self.store = Some(store);
        Ok(())
    }
}

/// Dynamic-lease DHCPv4 handler.
#[derive(Debug)]
pub struct BootloopHandler {
    state: Mutex<State>,
    lease_time: Duration,
    script_path: String,
}

impl BootloopHandler {
    /// Build the handler: open the lease file, reload persisted leases, and
    /// re-allocate each one into the bitmap.
    ///
    /// A persisted lease that does not re-allocate to its own address means
    /// the file disagrees with the configured range; startup aborts.
    pub fn from_config(config: &BootloopConfig) -> Result<Self, DhcpError> {
        let allocator = BitmapAllocator::new(config.ipv4_start, config.ipv4_end)?;
        let mut state = State {
            records: HashMap::new(),
            allocator,
            store: None,
        };
        state.register_backing(LeaseStore::open(&config.lease_file)?)?;

        let records = state
            .store
            .as_ref()
            .expect("backing store registered above")
            .load_all()?;
        for (mac, record) in &records {
            let got = state.allocator.allocate(Some(record.ip))?;
            if got != record.ip {
                return Err(DhcpError::LeaseReload {
                    mac: mac.clone(),
                    want: record.ip,
                    got,
                });
            }
        }
        info!("loaded {} persisted leases from {}", records.len(), config.lease_file);
        state.records = records;

        Ok(Self {
            state: Mutex::new(state),
            lease_time: config.lease_time,
            script_path: config.script_path.clone(),
        })
    }

    /// DHCPv6 is refused: the discovery ramdisk flow is v4-only.
    pub fn setup6() -> Result<std::sync::Arc<dyn Handler6>, DhcpError> {
        Err(DhcpError::UnsupportedProtocol {
            handler: "bootloop",
        })
    }

    /// Current lease for a MAC, if any.
    pub fn lease_for(&self, mac: &str) -> Option<LeaseRecord> {
        self.state.lock().unwrap().records.get(mac).cloned()
    }

    /// Whether an address in the range is currently unallocated.
    pub fn ip_is_free(&self, ip: Ipv4Addr) -> bool {
        self.state.lock().unwrap().allocator.is_free(ip)
    }

    fn lease_secs(&self) -> u32 {
        // whole seconds on the wire
        let secs = self.lease_time.as_secs();
        let rounded = if self.lease_time.subsec_millis() >= 500 {
            secs + 1
        } else {
            secs
        };
        rounded.min(u32::MAX as u64) as u32
    }

    fn handle_new_mac(
        &self,
        state: &mut State,
        req: &Message,
        mut resp: Message,
        mac: &str,
    ) -> Outcome<Message> {
        info!("MAC address {mac} is new, leasing new IPv4 address");
        let ip = match state.allocator.allocate(None) {
            Ok(ip) => ip,
            Err(err) => {
                error!("could not allocate IP for MAC {mac}: {err}");
                return Outcome::Drop;
            }
        };
        let record = LeaseRecord {
            ip,
            expires: Utc::now().timestamp() + i64::from(self.lease_secs()),
            hostname: options::requested_hostname(req).unwrap_or_default(),
        };
        if let Some(store) = &state.store {
            if let Err(err) = store.save(mac, &record) {
                // in-memory state stays authoritative; restart reconciles
                error!("saving lease for MAC {mac} failed: {err}");
            }
        }
        resp.set_yiaddr(record.ip);
        resp.opts_mut()
            .insert(DhcpOption::AddressLeaseTime(self.lease_secs()));
        state.records.insert(mac.to_string(), record);
        info!(
            "assigning {ip} to {mac} with a lease duration of {}",
            humantime::format_duration(self.lease_time)
        );

        if !options::is_ipxe(req) {
            // BOOT STAGE 1: chainload the iPXE bootloader over TFTP
            ipxe::serve_bootloader(req, &mut resp);
        }
        Outcome::Respond(resp)
    }

    fn handle_stale_mac(
        &self,
        state: &mut State,
        req: &Message,
        server_ip: Ipv4Addr,
        mac: &str,
        record: LeaseRecord,
    ) -> Outcome<Message> {
        // The client already holds a lease and is likely renewing. It may
        // exist in SMD by now, so force the full handshake and let the
        // SMD-driven handler claim it.
        let nak = nak_for(req, server_ip);
        if let Some(store) = &state.store {
            if let Err(err) = store.delete(mac) {
                error!("deleting lease for MAC {mac} failed: {err}");
            }
        }
        state.records.remove(mac);
        if let Err(err) = state.allocator.free(record.ip) {
            warn!("unable to free IP {}: {err}", record.ip);
        }
        info!(
            "MAC {mac} already exists with IP {}, sending NAK to reinitiate DHCP handshake",
            record.ip
        );
        Outcome::Respond(nak)
    }
}

/// A NAK echoing the request's transaction id and hardware address.
fn nak_for(req: &Message, server_ip: Ipv4Addr) -> Message {
    let mut nak = Message::default();
    nak.set_opcode(Opcode::BootReply);
    nak.set_xid(req.xid());
    nak.set_chaddr(req.chaddr());
    nak.set_giaddr(req.giaddr());
    nak.set_siaddr(server_ip);
    nak.opts_mut()
        .insert(DhcpOption::MessageType(MessageType::Nak));
    nak.opts_mut()
        .insert(DhcpOption::ServerIdentifier(server_ip));
    nak
}

#[async_trait::async_trait]
impl Handler4 for BootloopHandler {
    async fn handle(&self, req: &Message, mut resp: Message) -> Outcome<Message> {
        debug!("REQUEST: {}", crate::debug::summarize_v4(req));
        let Some(mac) = options::client_mac(req) else {
            debug!("request without an Ethernet hardware address, passing through");
            return Outcome::Pass(resp);
        };

        let mut state = self.state.lock().unwrap();

        let server_ip = resp.siaddr();
        resp.opts_mut()
            .insert(DhcpOption::RootPath(server_ip.to_string()));

        let outcome = match state.records.get(&mac).cloned() {
            None => self.handle_new_mac(&mut state, req, resp, &mac),
            Some(record) if options::is_ipxe(req) => {
                // BOOT STAGE 2: confirm the lease and hand over the script
                resp.opts_mut()
                    .insert(DhcpOption::BootfileName(self.script_path.clone().into_bytes()));
                resp.set_yiaddr(record.ip);
                resp.opts_mut()
                    .insert(DhcpOption::AddressLeaseTime(self.lease_secs()));
                Outcome::Respond(resp)
            }
            Some(record) => self.handle_stale_mac(&mut state, req, server_ip, &mac, record),
        };

        if let Outcome::Respond(resp) = &outcome {
            debug!("RESPONSE: {}", crate::debug::summarize_v4(resp));
        }
        outcome
    }
}

#[cfg(test)]
#[path = "bootloop_test.rs"]
mod bootloop_test;
