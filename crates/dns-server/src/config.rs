//! DNS service configuration.
//!
//! A small directive grammar: bare `key value` directives plus one or more
//! `zone <name> { nodes <pattern>; bmcs <pattern> }` stanzas. Newlines and
//! semicolons both end a directive.

use crate::error::DnsError;
use crate::zones::Zone;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_ZONE: &str = "cluster.local";
pub const DEFAULT_ZONE_NODE_PATTERN: &str = "nid{04d}";
pub const DEFAULT_ZONE_BMC_PATTERN: &str = "bmc-{id}";

/// Validated DNS configuration.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub smd_url: Url,
    pub ca_cert: Option<String>,
    pub cache_duration: Duration,
    pub zones: Vec<Zone>,
}

/// Tokenize: whitespace separates, `{` `}` `;` are tokens of their own.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '{' | '}' | ';' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

impl DnsConfig {
    /// Parse the configuration text.
    ///
    /// `smd_url` is required. Without any `zone` stanza a default zone is
    /// installed so the service is usable against a stock cluster.
    pub fn parse(text: &str) -> Result<(Self, Vec<String>), DnsError> {
        let mut warns = Vec::new();
        let mut smd_url = None;
        let mut ca_cert = None;
        let mut cache_duration = None;
        let mut zones: Vec<Zone> = Vec::new();

        // Zone patterns contain `{04d}`-style placeholders, which collide
        // with the stanza braces; the tokenizer keeps those glued to their
        // word.
        let tokens = tokenize_preserving_placeholders(text);
        let mut iter = tokens.iter();

        while let Some(token) = iter.next() {
            match token.as_str() {
                ";" => continue,
                "smd_url" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| DnsError::Config("smd_url needs a value".to_string()))?;
                    if smd_url.is_some() {
                        return Err(DnsError::Config("smd_url already specified".to_string()));
                    }
                    smd_url = Some(Url::parse(value).map_err(|e| {
                        DnsError::Config(format!("invalid smd_url '{value}': {e}"))
                    })?);
                }
                "ca_cert" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| DnsError::Config("ca_cert needs a value".to_string()))?;
                    ca_cert = Some(value.clone());
                }
                "cache_duration" => {
                    let value = iter.next().ok_or_else(|| {
                        DnsError::Config("cache_duration needs a value".to_string())
                    })?;
                    cache_duration =
                        Some(humantime::parse_duration(value).map_err(|e| {
                            DnsError::Config(format!("invalid cache_duration '{value}': {e}"))
                        })?);
                }
                "zone" => {
                    let name = iter
                        .next()
                        .ok_or_else(|| DnsError::Config("zone needs a name".to_string()))?;
                    zones.push(parse_zone(name, &mut iter)?);
                }
                other => {
                    return Err(DnsError::Config(format!("unknown directive '{other}'")));
                }
            }
        }

        let smd_url =
            smd_url.ok_or_else(|| DnsError::Config("smd_url is required".to_string()))?;
        let cache_duration = cache_duration.unwrap_or_else(|| {
            warns.push(format!(
                "cache_duration unset, defaulting to {}",
                humantime::format_duration(DEFAULT_CACHE_DURATION)
            ));
            DEFAULT_CACHE_DURATION
        });
        if zones.is_empty() {
            warns.push(format!(
                "no zones configured, serving {DEFAULT_ZONE} with nodes {DEFAULT_ZONE_NODE_PATTERN} \
                 and bmcs {DEFAULT_ZONE_BMC_PATTERN}"
            ));
            zones.push(Zone::new(
                DEFAULT_ZONE,
                DEFAULT_ZONE_NODE_PATTERN,
                DEFAULT_ZONE_BMC_PATTERN,
            ));
        }
        for zone in &zones {
            warns.extend(smd_inventory::hostname::pattern_warnings(&zone.node_pattern));
            warns.extend(smd_inventory::hostname::pattern_warnings(&zone.bmc_pattern));
        }

        Ok((
            Self {
                smd_url,
                ca_cert,
                cache_duration,
                zones,
            },
            warns,
        ))
    }
}

/// Whether brace contents form a hostname placeholder (`id` or `0*Nd`).
fn is_placeholder(inner: &str) -> bool {
    if inner == "id" {
        return true;
    }
    let digits = inner.strip_suffix('d').unwrap_or("");
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Tokenize, but keep `{0*Nd}` and `{id}` placeholders glued to their word.
///
/// A `{` opens a placeholder only when the text up to the next `}` matches
/// the placeholder grammar; stanza braces never do.
fn tokenize_preserving_placeholders(text: &str) -> Vec<String> {
    let mut protected = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' {
            if let Some(close) = chars[i + 1..].iter().position(|&x| x == '}') {
                let inner: String = chars[i + 1..i + 1 + close].iter().collect();
                if is_placeholder(&inner) {
                    protected.push('\u{1}');
                    protected.push_str(&inner);
                    protected.push('\u{2}');
                    i += close + 2;
                    continue;
                }
            }
        }
        protected.push(c);
        i += 1;
    }

    tokenize(&protected)
        .into_iter()
        .map(|t| t.replace('\u{1}', "{").replace('\u{2}', "}"))
        .collect()
}

fn parse_zone<'a, I>(name: &str, iter: &mut I) -> Result<Zone, DnsError>
where
    I: Iterator<Item = &'a String>,
{
    match iter.next().map(String::as_str) {
        Some("{") => {}
        other => {
            return Err(DnsError::Config(format!(
                "expected '{{' after zone name, got {:?}",
                other.unwrap_or("end of input")
            )));
        }
    }

    let mut node_pattern = DEFAULT_ZONE_NODE_PATTERN.to_string();
    let mut bmc_pattern = DEFAULT_ZONE_BMC_PATTERN.to_string();

    loop {
        match iter.next().map(String::as_str) {
            Some("}") => break,
            Some(";") => continue,
            Some("nodes") => {
                node_pattern = iter
                    .next()
                    .ok_or_else(|| DnsError::Config("nodes needs a pattern".to_string()))?
                    .clone();
            }
            Some("bmcs") => {
                bmc_pattern = iter
                    .next()
                    .ok_or_else(|| DnsError::Config("bmcs needs a pattern".to_string()))?
                    .clone();
            }
            Some(other) => {
                return Err(DnsError::Config(format!(
                    "unknown zone directive '{other}'"
                )));
            }
            None => {
                return Err(DnsError::Config(format!(
                    "unterminated zone block for '{name}'"
                )));
            }
        }
    }

    Ok(Zone::new(name, &node_pattern, &bmc_pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_configuration() {
        let text = r#"
            smd_url http://smd:27779
            ca_cert /etc/smdboot/ca.pem
            cache_duration 45s
            zone cluster.local {
                nodes nid{04d}
                bmcs bmc-{id}
            }
            zone mgmt.local {
                nodes mgmt{02d};
                bmcs {id};
            }
        "#;
        let (config, warns) = DnsConfig::parse(text).unwrap();
        assert!(warns.is_empty());
        assert_eq!(config.smd_url.as_str(), "http://smd:27779/");
        assert_eq!(config.ca_cert.as_deref(), Some("/etc/smdboot/ca.pem"));
        assert_eq!(config.cache_duration, Duration::from_secs(45));
        assert_eq!(config.zones.len(), 2);
        assert_eq!(config.zones[0].node_pattern, "nid{04d}");
        assert_eq!(config.zones[1].name, "mgmt.local");
        assert_eq!(config.zones[1].node_pattern, "mgmt{02d}");
        assert_eq!(config.zones[1].bmc_pattern, "{id}");
    }

    #[test]
    fn smd_url_is_required() {
        let err = DnsConfig::parse("cache_duration 30s").unwrap_err();
        assert!(err.to_string().contains("smd_url is required"));
    }

    #[test]
    fn duplicate_smd_url_is_rejected() {
        let text = "smd_url http://a:1\nsmd_url http://b:2";
        assert!(DnsConfig::parse(text).is_err());
    }

    #[test]
    fn missing_zone_brace_is_rejected() {
        let err = DnsConfig::parse("smd_url http://smd:27779\nzone cluster.local nodes x")
            .unwrap_err();
        assert!(err.to_string().contains("expected '{'"));
    }

    #[test]
    fn default_zone_applies_with_warning() {
        let (config, warns) = DnsConfig::parse("smd_url http://smd:27779").unwrap();
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.zones[0].name, DEFAULT_ZONE);
        assert!(warns.iter().any(|w| w.contains("no zones configured")));
    }

    #[test]
    fn unknown_directives_are_rejected() {
        let err = DnsConfig::parse("smd_url http://smd:27779\nttl 30").unwrap_err();
        assert!(err.to_string().contains("unknown directive"));
    }
}
