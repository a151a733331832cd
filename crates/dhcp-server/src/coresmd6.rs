//! SMD-driven DHCPv6 handler.
//!
//! Same bind-and-boot machine as the v4 side, expressed in v6 terms: the
//! client is identified by the MAC inside its DUID, the address rides in an
//! IA_NA, and both boot stages use the bootfile-URL option (stage 1 points
//! at `ipxe.efi` over TFTP, stage 2 at the HTTP bootscript).

use crate::config::CoresmdConfig;
use crate::coresmd::{bootscript_url, lookup_mac};
use crate::handler::{Handler6, Outcome};
use crate::options6;
use dhcproto::v6::{DhcpOption, DhcpOptions, Message, OptionCode, UnknownOption, IAAddr, IANA};
use smd_inventory::Cache;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, error, info};

/// SMD-driven DHCPv6 handler.
pub struct CoresmdHandler6 {
    cache: Arc<Cache>,
    config: CoresmdConfig,
    /// Address stage-1 clients fetch `ipxe.efi` from.
    server_ip: Ipv6Addr,
}

impl CoresmdHandler6 {
    pub fn new(cache: Arc<Cache>, config: CoresmdConfig, server_ip: Ipv6Addr) -> Self {
        Self {
            cache,
            config,
            server_ip,
        }
    }

    fn lease_secs(&self) -> u32 {
        self.config.lease_time.as_secs().min(u32::MAX as u64) as u32
    }

    /// The stage-1 chainload URL: iPXE's EFI binary over TFTP.
    fn tftp_url(&self) -> String {
        format!(
            "tftp://[{}]:{}/ipxe.efi",
            self.server_ip, self.config.tftp_port
        )
    }
}

fn first_ipv6(ips: &[IpAddr]) -> Option<Ipv6Addr> {
    ips.iter().find_map(|ip| match ip {
        IpAddr::V6(v6) => Some(*v6),
        IpAddr::V4(_) => None,
    })
}

#[async_trait::async_trait]
impl Handler6 for CoresmdHandler6 {
    async fn handle(&self, req: &Message, mut resp: Message) -> Outcome<Message> {
        debug!("REQUEST: {}", crate::debug::summarize_v6(req));
        let Some(mac) = options6::client_mac(req) else {
            debug!("no MAC recoverable from client DUID, passing through");
            return Outcome::Pass(resp);
        };

        let snapshot = self.cache.read().await;
        let info = match lookup_mac(&snapshot, &mac) {
            Ok(info) => info,
            Err(err) => {
                error!("IP lookup failed: {err}");
                return Outcome::Pass(resp);
            }
        };
        let Some(assigned) = first_ipv6(&info.ips) else {
            error!(
                "no IPv6 address available for hardware address {mac} (Component {})",
                info.component_id
            );
            return Outcome::Pass(resp);
        };
        drop(snapshot);

        let lease = self.lease_secs();
        let mut ia_opts = DhcpOptions::default();
        ia_opts.insert(DhcpOption::IAAddr(IAAddr {
            addr: assigned,
            preferred_life: lease,
            valid_life: lease,
            opts: DhcpOptions::default(),
        }));
        resp.opts_mut().insert(DhcpOption::IANA(IANA {
            id: options6::iaid(req).unwrap_or(0),
            t1: lease / 2,
            t2: lease / 4 * 3,
            opts: ia_opts,
        }));

        info!(
            "assigning IPv6 {assigned} to {mac} ({}) with a lease duration of {}",
            info.kind,
            humantime::format_duration(self.config.lease_time)
        );

        let bootfile_url = if options6::is_ipxe(req) {
            bootscript_url(&self.config.ipxe_base_uri, &mac)
        } else {
            self.tftp_url()
        };
        resp.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
            OptionCode::OptBootfileUrl,
            bootfile_url.into_bytes(),
        )));

        debug!("RESPONSE: {}", crate::debug::summarize_v6(&resp));
        Outcome::Respond(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoresmdArgs;
    use crate::server::reply_skeleton_v6;
    use dhcproto::v6::{MessageType, OptionCode};
    use smd_client::{Component, EthernetInterface, IpEntry, MockSmdClient};

    const SERVER_IP6: Ipv6Addr = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);

    fn test_config() -> CoresmdConfig {
        let (args, _) = CoresmdArgs::parse(&[
            "svc_base_uri=http://smd:27779".to_string(),
            "ipxe_base_uri=http://bss:8081".to_string(),
            "lease_time=1h".to_string(),
        ]);
        args.validate().unwrap().0
    }

    async fn test_cache() -> Arc<Cache> {
        let mock = MockSmdClient::new("http://smd.test");
        mock.set_ethernet_interfaces(&[EthernetInterface {
            mac_address: "00:11:22:33:44:55".to_string(),
            component_id: "n1".to_string(),
            kind: "NodeMgmt".to_string(),
            description: String::new(),
            ip_addresses: vec![
                IpEntry {
                    ip_address: "192.168.1.10".to_string(),
                },
                IpEntry {
                    ip_address: "fd00::10".to_string(),
                },
            ],
        }]);
        mock.set_components(&[Component {
            id: "n1".to_string(),
            nid: 1,
            kind: "Node".to_string(),
        }]);
        let cache = Arc::new(Cache::new("30s", Arc::new(mock)).unwrap());
        cache.refresh().await.unwrap();
        cache
    }

    fn solicit(ipxe: bool) -> Message {
        let mut msg = Message::new(MessageType::Solicit);
        // DUID-LL for 00:11:22:33:44:55
        msg.opts_mut().insert(DhcpOption::ClientId(vec![
            0x00, 0x03, 0x00, 0x01, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
        ]));
        msg.opts_mut().insert(DhcpOption::IANA(IANA {
            id: 7,
            t1: 0,
            t2: 0,
            opts: DhcpOptions::default(),
        }));
        if ipxe {
            msg.opts_mut().insert(DhcpOption::UserClass(
                options6::encode_user_class("iPXE"),
            ));
        }
        msg
    }

    fn get_iana(resp: &Message) -> &IANA {
        match resp.opts().get(OptionCode::IANA).unwrap() {
            DhcpOption::IANA(iana) => iana,
            other => panic!("unexpected option {other:?}"),
        }
    }

    fn get_bootfile_url(resp: &Message) -> String {
        match resp.opts().get(OptionCode::BootfileUrl).unwrap() {
            DhcpOption::BootfileUrl(url) => String::from_utf8(url.clone()).unwrap(),
            other => panic!("unexpected option {other:?}"),
        }
    }

    #[tokio::test]
    async fn stage1_advertises_ia_na_and_tftp_url() {
        let handler = CoresmdHandler6::new(test_cache().await, test_config(), SERVER_IP6);
        let req = solicit(false);
        let resp = reply_skeleton_v6(&req, b"srv-duid").unwrap();

        let Outcome::Respond(resp) = handler.handle(&req, resp).await else {
            panic!("expected a response");
        };
        let iana = get_iana(&resp);
        assert_eq!(iana.id, 7);
        // T1 = lease/2, T2 = lease*3/4
        assert_eq!(iana.t1, 1800);
        assert_eq!(iana.t2, 2700);
        match iana.opts.get(OptionCode::IAAddr).unwrap() {
            DhcpOption::IAAddr(addr) => {
                assert_eq!(addr.addr, "fd00::10".parse::<Ipv6Addr>().unwrap());
                assert_eq!(addr.preferred_life, 3600);
                assert_eq!(addr.valid_life, 3600);
            }
            other => panic!("unexpected option {other:?}"),
        }
        assert_eq!(get_bootfile_url(&resp), "tftp://[fd00::1]:69/ipxe.efi");
    }

    #[tokio::test]
    async fn stage2_ipxe_client_gets_bootscript_url() {
        let handler = CoresmdHandler6::new(test_cache().await, test_config(), SERVER_IP6);
        let req = solicit(true);
        let resp = reply_skeleton_v6(&req, b"srv-duid").unwrap();

        let Outcome::Respond(resp) = handler.handle(&req, resp).await else {
            panic!("expected a response");
        };
        assert_eq!(
            get_bootfile_url(&resp),
            "http://bss:8081/boot/v1/bootscript?mac=00:11:22:33:44:55"
        );
    }

    #[tokio::test]
    async fn unknown_duid_passes_through() {
        let handler = CoresmdHandler6::new(test_cache().await, test_config(), SERVER_IP6);
        let mut req = Message::new(MessageType::Solicit);
        req.opts_mut()
            .insert(DhcpOption::ClientId(vec![0x00, 0x02, 0x00, 0x01, 0xff]));
        let resp = reply_skeleton_v6(&req, b"srv-duid").unwrap();

        assert!(matches!(handler.handle(&req, resp).await, Outcome::Pass(_)));
    }
}
