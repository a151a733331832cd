//! DHCPv4 option plumbing.
//!
//! Everything that touches `dhcproto` option variants for v4 lives here so
//! the handlers read at the domain level (MAC, user class, architecture)
//! instead of the wire level.

use crate::storage::canonical_mac;
use dhcproto::v4::{DhcpOption, Message, OptionCode};

/// Canonical lowercase MAC of the client hardware address.
///
/// Returns `None` when the header does not carry an Ethernet-sized address.
pub fn client_mac(msg: &Message) -> Option<String> {
    let chaddr = msg.chaddr();
    if chaddr.len() < 6 {
        return None;
    }
    Some(canonical_mac(&chaddr[..6]))
}

/// The user-class option (77) as text, if present.
pub fn user_class(msg: &Message) -> Option<String> {
    match msg.opts().get(OptionCode::UserClass)? {
        DhcpOption::UserClass(data) => Some(String::from_utf8_lossy(data).into_owned()),
        _ => None,
    }
}

/// Whether the request came from a running iPXE client (stage 2).
pub fn is_ipxe(msg: &Message) -> bool {
    user_class(msg).as_deref() == Some(crate::ipxe::IPXE_USER_CLASS)
}

/// The client system architecture code (option 93), if present.
pub fn client_arch_code(msg: &Message) -> Option<u16> {
    match msg.opts().get(OptionCode::ClientSystemArchitecture)? {
        DhcpOption::ClientSystemArchitecture(arch) => Some(u16::from(*arch)),
        _ => None,
    }
}

/// The hostname the client declared (option 12), if any.
pub fn requested_hostname(msg: &Message) -> Option<String> {
    match msg.opts().get(OptionCode::Hostname)? {
        DhcpOption::Hostname(name) => Some(name.clone()),
        _ => None,
    }
}

/// The server the client is addressing (option 54), if any.
pub fn server_identifier(msg: &Message) -> Option<std::net::Ipv4Addr> {
    match msg.opts().get(OptionCode::ServerIdentifier)? {
        DhcpOption::ServerIdentifier(ip) => Some(*ip),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::{self, Architecture};
    use std::net::Ipv4Addr;

    fn base_request() -> Message {
        let mut msg = Message::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
        );
        msg.opts_mut()
            .insert(DhcpOption::MessageType(v4::MessageType::Discover));
        msg
    }

    #[test]
    fn client_mac_is_lowercase_colon_separated() {
        let msg = base_request();
        assert_eq!(client_mac(&msg).as_deref(), Some("00:11:22:33:44:55"));
    }

    #[test]
    fn user_class_roundtrip() {
        let mut msg = base_request();
        assert_eq!(user_class(&msg), None);
        assert!(!is_ipxe(&msg));

        msg.opts_mut()
            .insert(DhcpOption::UserClass(b"iPXE".to_vec()));
        assert_eq!(user_class(&msg).as_deref(), Some("iPXE"));
        assert!(is_ipxe(&msg));
    }

    #[test]
    fn arch_code_extracted_from_option() {
        let mut msg = base_request();
        assert_eq!(client_arch_code(&msg), None);

        msg.opts_mut()
            .insert(DhcpOption::ClientSystemArchitecture(Architecture::from(0u16)));
        assert_eq!(client_arch_code(&msg), Some(0));
    }

    #[test]
    fn requested_hostname_extracted() {
        let mut msg = base_request();
        msg.opts_mut()
            .insert(DhcpOption::Hostname("metal-7".to_string()));
        assert_eq!(requested_hostname(&msg).as_deref(), Some("metal-7"));
    }
}
