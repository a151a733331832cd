//! Reverse-DNS name decoding.
//!
//! Turns `d.c.b.a.in-addr.arpa` and the 32-nibble `ip6.arpa` form back into
//! addresses. Callers are expected to lowercase the query name first.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const IPV4_SUFFIX: &str = ".in-addr.arpa";
const IPV6_SUFFIX: &str = ".ip6.arpa";

/// Decode a reverse lookup name into an IP address.
///
/// Returns `None` for any other suffix, a wrong label count, or any label
/// that is not a plain decimal octet / hex nibble.
pub fn reverse_to_ip(name: &str) -> Option<IpAddr> {
    let name = name.strip_suffix('.').unwrap_or(name);

    if let Some(rest) = name.strip_suffix(IPV4_SUFFIX) {
        let labels: Vec<&str> = rest.split('.').collect();
        if labels.len() != 4 {
            return None;
        }
        let mut octets = [0u8; 4];
        for (octet, label) in octets.iter_mut().zip(labels.iter().rev()) {
            // u8::from_str accepts a leading '+'; a reverse label must not
            if label.is_empty() || !label.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            *octet = label.parse().ok()?;
        }
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }

    if let Some(rest) = name.strip_suffix(IPV6_SUFFIX) {
        let labels: Vec<&str> = rest.split('.').collect();
        if labels.len() != 32 {
            return None;
        }
        let mut text = String::with_capacity(39);
        for (i, label) in labels.iter().rev().enumerate() {
            if label.len() != 1 || !label.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            if i > 0 && i % 4 == 0 {
                text.push(':');
            }
            text.push_str(label);
        }
        return text.parse::<Ipv6Addr>().ok().map(IpAddr::V6);
    }

    None
}

/// Render the reverse lookup name for an address (no trailing dot).
///
/// The inverse of [`reverse_to_ip`] for well-formed names.
pub fn ip_to_reverse_name(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}{IPV4_SUFFIX}")
        }
        IpAddr::V6(v6) => {
            let mut labels = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                labels.push(format!("{:x}", byte & 0x0f));
                labels.push(format!("{:x}", byte >> 4));
            }
            format!("{}{IPV6_SUFFIX}", labels.join("."))
        }
    }
}
