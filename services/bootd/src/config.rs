//! bootd configuration file.
//!
//! A sectioned file: `[server]` for listen addresses, `[coresmd]` and
//! `[bootloop]` whose body lines are handed verbatim to the handlers' own
//! `key=value` parsers, and `[dns]` whose body is handed to the DNS
//! directive parser. `#` starts a comment; blank lines are ignored.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

/// Listen addresses and identities for the serve loops.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub dhcp_listen: SocketAddr,
    pub dhcp6_listen: Option<SocketAddr>,
    pub dns_listen: SocketAddr,
    /// Address DHCPv4 replies advertise as the server.
    pub server_ip: Option<Ipv4Addr>,
    /// Address stage-1 v6 clients fetch `ipxe.efi` from.
    pub server_ip6: Option<Ipv6Addr>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            dhcp_listen: SocketAddr::from(([0, 0, 0, 0], 67)),
            dhcp6_listen: None,
            dns_listen: SocketAddr::from(([0, 0, 0, 0], 53)),
            server_ip: None,
            server_ip6: None,
        }
    }
}

/// The file split into its sections.
#[derive(Debug, Default)]
pub struct BootdConfig {
    pub server: ServerSettings,
    /// `key=value` argument list for the coresmd handler.
    pub coresmd: Option<Vec<String>>,
    /// `key=value` argument list for the bootloop handler.
    pub bootloop: Option<Vec<String>>,
    /// Raw directive text for the DNS handler.
    pub dns: Option<String>,
}

impl BootdConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: HashMap<String, Vec<String>> = HashMap::new();
        let mut current: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_lowercase();
                match name.as_str() {
                    "server" | "coresmd" | "bootloop" | "dns" => {
                        if sections.contains_key(&name) {
                            bail!("line {}: duplicate section [{name}]", lineno + 1);
                        }
                        sections.insert(name.clone(), Vec::new());
                        current = Some(name);
                    }
                    other => bail!("line {}: unknown section [{other}]", lineno + 1),
                }
                continue;
            }
            match &current {
                Some(section) => sections
                    .get_mut(section)
                    .expect("section inserted when entered")
                    .push(line.to_string()),
                None => bail!("line {}: directive before any section header", lineno + 1),
            }
        }

        let server = match sections.remove("server") {
            Some(lines) => parse_server(&lines)?,
            None => ServerSettings::default(),
        };

        Ok(Self {
            server,
            coresmd: sections.remove("coresmd"),
            bootloop: sections.remove("bootloop"),
            dns: sections.remove("dns").map(|lines| lines.join("\n")),
        })
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_server(lines: &[String]) -> Result<ServerSettings> {
    let mut settings = ServerSettings::default();
    for line in lines {
        let (key, value) = line
            .split_once('=')
            .with_context(|| format!("[server] line '{line}' is not key=value"))?;
        let (key, value) = (key.trim(), value.trim());
        match key {
            "dhcp_listen" => {
                settings.dhcp_listen = value
                    .parse()
                    .with_context(|| format!("invalid dhcp_listen '{value}'"))?;
            }
            "dhcp6_listen" => {
                settings.dhcp6_listen = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid dhcp6_listen '{value}'"))?,
                );
            }
            "dns_listen" => {
                settings.dns_listen = value
                    .parse()
                    .with_context(|| format!("invalid dns_listen '{value}'"))?;
            }
            "server_ip" => {
                settings.server_ip = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid server_ip '{value}'"))?,
                );
            }
            "server_ip6" => {
                settings.server_ip6 = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid server_ip6 '{value}'"))?,
                );
            }
            other => bail!("unknown [server] key '{other}'"),
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let text = r#"
            [server]
            dhcp_listen = 0.0.0.0:6767   # test port
            server_ip = 192.168.1.1
            dns_listen = 0.0.0.0:5353

            [coresmd]
            svc_base_uri=http://smd:27779
            ipxe_base_uri=http://bss:8081

            [bootloop]
            lease_file=/var/lib/smdboot/leases.db
            ipv4_start=10.0.0.5
            ipv4_end=10.0.0.254

            [dns]
            smd_url http://smd:27779
            zone cluster.local {
                nodes nid{04d}
            }
        "#;
        let config = BootdConfig::parse(text).unwrap();
        assert_eq!(config.server.dhcp_listen.port(), 6767);
        assert_eq!(config.server.server_ip, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(
            config.coresmd.as_deref(),
            Some(
                &[
                    "svc_base_uri=http://smd:27779".to_string(),
                    "ipxe_base_uri=http://bss:8081".to_string(),
                ][..]
            )
        );
        assert_eq!(config.bootloop.as_ref().unwrap().len(), 3);
        assert!(config.dns.as_ref().unwrap().contains("zone cluster.local"));
    }

    #[test]
    fn missing_sections_stay_absent() {
        let config = BootdConfig::parse("[dns]\nsmd_url http://smd:27779").unwrap();
        assert!(config.coresmd.is_none());
        assert!(config.bootloop.is_none());
        assert!(config.dns.is_some());
        assert_eq!(config.server.dhcp_listen.port(), 67);
    }

    #[test]
    fn unknown_sections_and_stray_lines_fail() {
        assert!(BootdConfig::parse("[mystery]\n").is_err());
        assert!(BootdConfig::parse("stray=line\n").is_err());
        assert!(BootdConfig::parse("[dns]\nx\n[dns]\ny").is_err());
    }
}
