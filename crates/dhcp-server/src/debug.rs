//! One-line DHCP message summaries for debug logging.
//!
//! Handlers log the request they saw and the response they built; a full
//! packet dump is too loud and the header alone too quiet. These renderers
//! sit in between: message type, addresses, and the boot-relevant options.

use crate::options;
use crate::storage::canonical_mac;
use dhcproto::v4::{DhcpOption, Message, OptionCode};
use std::fmt::Write;

fn v4_message_type(msg: &Message) -> String {
    match msg.opts().get(OptionCode::MessageType) {
        Some(DhcpOption::MessageType(t)) => format!("{t:?}"),
        _ => "(untyped)".to_string(),
    }
}

/// Render a v4 message for a debug line.
pub fn summarize_v4(msg: &Message) -> String {
    let mut out = String::with_capacity(128);
    let _ = write!(
        out,
        "{} xid={:#010x} chaddr={}",
        v4_message_type(msg),
        msg.xid(),
        canonical_mac(&msg.chaddr()[..msg.chaddr().len().min(6)]),
    );
    if !msg.yiaddr().is_unspecified() {
        let _ = write!(out, " yiaddr={}", msg.yiaddr());
    }
    if !msg.ciaddr().is_unspecified() {
        let _ = write!(out, " ciaddr={}", msg.ciaddr());
    }
    if !msg.giaddr().is_unspecified() {
        let _ = write!(out, " giaddr={}", msg.giaddr());
    }
    if let Some(class) = options::user_class(msg) {
        let _ = write!(out, " user_class={class}");
    }
    if let Some(code) = options::client_arch_code(msg) {
        let _ = write!(out, " arch={code}");
    }
    if let Some(DhcpOption::BootfileName(name)) = msg.opts().get(OptionCode::BootfileName) {
        let _ = write!(out, " bootfile={}", String::from_utf8_lossy(name));
    }
    if let Some(DhcpOption::AddressLeaseTime(secs)) = msg.opts().get(OptionCode::AddressLeaseTime)
    {
        let _ = write!(out, " lease={secs}s");
    }
    out
}

/// Render a v6 message for a debug line.
pub fn summarize_v6(msg: &dhcproto::v6::Message) -> String {
    use dhcproto::v6::{DhcpOption, OptionCode};

    let mut out = String::with_capacity(128);
    let _ = write!(out, "{:?}", msg.msg_type());
    if let Some(mac) = crate::options6::client_mac(msg) {
        let _ = write!(out, " client={mac}");
    }
    if let Some(DhcpOption::IANA(iana)) = msg.opts().get(OptionCode::IANA) {
        let _ = write!(out, " iaid={:#010x} t1={} t2={}", iana.id, iana.t1, iana.t2);
    }
    if let Some(DhcpOption::Unknown(opt)) = msg.opts().get(OptionCode::OptBootfileUrl) {
        let _ = write!(out, " bootfile-url={}", String::from_utf8_lossy(opt.data()));
    }
    if crate::options6::is_ipxe(msg) {
        out.push_str(" user_class=iPXE");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::{self, MessageType};
    use std::net::Ipv4Addr;

    #[test]
    fn summary_includes_type_mac_and_boot_options() {
        let mut msg = Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
        );
        msg.opts_mut()
            .insert(v4::DhcpOption::MessageType(MessageType::Offer));
        msg.opts_mut()
            .insert(v4::DhcpOption::BootfileName("ipxe-x86_64.efi".to_string()));
        msg.opts_mut()
            .insert(v4::DhcpOption::AddressLeaseTime(300));

        let line = summarize_v4(&msg);
        assert!(line.starts_with("Offer"));
        assert!(line.contains("chaddr=aa:bb:cc:dd:ee:ff"));
        assert!(line.contains("yiaddr=10.0.0.5"));
        assert!(line.contains("bootfile=ipxe-x86_64.efi"));
        assert!(line.contains("lease=300s"));
    }

    #[test]
    fn v6_summary_includes_duid_mac_and_iaid() {
        use dhcproto::v6;

        let mut msg = v6::Message::new(v6::MessageType::Solicit);
        msg.opts_mut().insert(v6::DhcpOption::ClientId(vec![
            0x00, 0x03, 0x00, 0x01, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
        ]));
        msg.opts_mut().insert(v6::DhcpOption::IANA(v6::IANA {
            id: 7,
            t1: 10,
            t2: 20,
            opts: v6::DhcpOptions::default(),
        }));

        let line = summarize_v6(&msg);
        assert!(line.starts_with("Solicit"));
        assert!(line.contains("client=00:11:22:33:44:55"));
        assert!(line.contains("t1=10 t2=20"));
    }

    #[test]
    fn summary_omits_unset_fields() {
        let msg = Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0, 0, 0, 0, 0, 1],
        );
        let line = summarize_v4(&msg);
        assert!(line.contains("(untyped)"));
        assert!(!line.contains("yiaddr"));
        assert!(!line.contains("bootfile"));
    }
}
