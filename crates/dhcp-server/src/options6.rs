//! DHCPv6 option plumbing.
//!
//! DUID handling and user-class parsing for the v6 path. As with v4, the
//! handlers never touch `dhcproto` variants directly.

use crate::storage::canonical_mac;
use dhcproto::v6::{DhcpOption, Message, OptionCode, IANA};

const DUID_LLT: u16 = 1;
const DUID_LL: u16 = 3;
const HWTYPE_ETHERNET: u16 = 1;

/// The raw client DUID, if the message carries one.
pub fn client_duid(msg: &Message) -> Option<Vec<u8>> {
    match msg.opts().get(OptionCode::ClientId)? {
        DhcpOption::ClientId(duid) => Some(duid.clone()),
        _ => None,
    }
}

/// Extract the Ethernet MAC embedded in a DUID.
///
/// DUID-LLT carries it after type/hwtype/time (offset 8), DUID-LL right
/// after type/hwtype (offset 4). Other DUID types carry no MAC.
pub fn duid_to_mac(duid: &[u8]) -> Option<String> {
    if duid.len() < 4 {
        return None;
    }
    let duid_type = u16::from_be_bytes([duid[0], duid[1]]);
    let hwtype = u16::from_be_bytes([duid[2], duid[3]]);
    if hwtype != HWTYPE_ETHERNET {
        return None;
    }
    let mac = match duid_type {
        DUID_LLT if duid.len() >= 14 => &duid[8..14],
        DUID_LL if duid.len() >= 10 => &duid[4..10],
        _ => return None,
    };
    Some(canonical_mac(mac))
}

/// Canonical lowercase MAC of the requesting client, via its DUID.
pub fn client_mac(msg: &Message) -> Option<String> {
    duid_to_mac(&client_duid(msg)?)
}

/// Whether any user-class instance (option 15) equals `iPXE`.
///
/// The option payload is a sequence of length-prefixed instances.
pub fn is_ipxe(msg: &Message) -> bool {
    let data = match msg.opts().get(OptionCode::UserClass) {
        Some(DhcpOption::UserClass(data)) => data.clone(),
        _ => return false,
    };
    data.data
        .iter()
        .any(|instance| instance.as_slice() == crate::ipxe::IPXE_USER_CLASS.as_bytes())
}

/// The IAID of the request's IA_NA, so the reply can echo it.
pub fn iaid(msg: &Message) -> Option<u32> {
    match msg.opts().get(OptionCode::IANA)? {
        DhcpOption::IANA(IANA { id, .. }) => Some(*id),
        _ => None,
    }
}

/// Encode one user-class instance the way clients send it.
pub fn encode_user_class(class: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(class.len() + 2);
    data.extend_from_slice(&(class.len() as u16).to_be_bytes());
    data.extend_from_slice(class.as_bytes());
    data
}
