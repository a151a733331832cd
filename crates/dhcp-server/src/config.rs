//! Handler configuration: ordered `key=value` arguments, two-phase.
//!
//! Parsing attaches every recognized value and collects per-argument
//! problems instead of bailing, so the operator sees all of them at once.
//! Validation then applies defaults and separates warnings from fatal
//! errors; the host aborts startup only on the latter.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TFTP_DIRECTORY: &str = "/tftpboot";
pub const DEFAULT_TFTP_PORT: u16 = 69;
pub const DEFAULT_CACHE_VALID: Duration = Duration::from_secs(30);
pub const DEFAULT_LEASE_TIME: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_BMC_PATTERN: &str = "bmc{04d}";
pub const DEFAULT_NODE_PATTERN: &str = "nid{04d}";

/// A single configuration problem, tied to its argument position where one
/// exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("arg {idx}: invalid format '{arg}', should be 'key=val' (skipping)")]
    InvalidFormat { idx: usize, arg: String },

    #[error("arg {idx}: {key}: invalid value '{value}' (skipping): {reason}")]
    InvalidValue {
        idx: usize,
        key: String,
        value: String,
        reason: String,
    },

    #[error("arg {idx}: unknown config key '{key}' (skipping)")]
    UnknownKey { idx: usize, key: String },

    #[error("{key} is required")]
    Required { key: &'static str },
}

/// Fatal validation outcome: everything the operator should see before the
/// process exits.
#[derive(Debug)]
pub struct ConfigFailure {
    pub warnings: Vec<String>,
    pub errors: Vec<ConfigError>,
}

impl fmt::Display for ConfigFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fatal errors occurred", self.errors.len())
    }
}

impl std::error::Error for ConfigFailure {}

/// Strip one layer of single or double quotes.
pub(crate) fn trim_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

/// Split one argument into `(key, value)`, or record a format error.
pub(crate) fn split_arg<'a>(
    idx: usize,
    arg: &'a str,
    errs: &mut Vec<ConfigError>,
) -> Option<(&'a str, &'a str)> {
    match arg.split_once('=') {
        Some(kv) => Some(kv),
        None => {
            errs.push(ConfigError::InvalidFormat {
                idx,
                arg: arg.to_string(),
            });
            None
        }
    }
}

/// Parsed-but-unvalidated coresmd configuration.
#[derive(Debug, Default)]
pub struct CoresmdArgs {
    pub svc_base_uri: Option<Url>,
    pub ipxe_base_uri: Option<Url>,
    pub ca_cert: Option<String>,
    pub cache_valid: Option<Duration>,
    pub lease_time: Option<Duration>,
    pub single_port: bool,
    pub tftp_dir: Option<String>,
    pub tftp_port: Option<u16>,
    pub bmc_pattern: Option<String>,
    pub node_pattern: Option<String>,
    pub domain: Option<String>,
}

/// Validated coresmd configuration, defaults applied.
#[derive(Debug, Clone)]
pub struct CoresmdConfig {
    pub svc_base_uri: Url,
    pub ipxe_base_uri: Url,
    pub ca_cert: Option<String>,
    pub cache_valid: Duration,
    pub lease_time: Duration,
    pub single_port: bool,
    pub tftp_dir: String,
    pub tftp_port: u16,
    pub bmc_pattern: String,
    pub node_pattern: String,
    pub domain: Option<String>,
}

impl fmt::Display for CoresmdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "svc_base_uri={} ipxe_base_uri={} ca_cert={} cache_valid={} lease_time={} \
             single_port={} tftp_dir={} tftp_port={} bmc_pattern={} node_pattern={} domain={}",
            self.svc_base_uri,
            self.ipxe_base_uri,
            self.ca_cert.as_deref().unwrap_or(""),
            humantime::format_duration(self.cache_valid),
            humantime::format_duration(self.lease_time),
            self.single_port,
            self.tftp_dir,
            self.tftp_port,
            self.bmc_pattern,
            self.node_pattern,
            self.domain.as_deref().unwrap_or(""),
        )
    }
}

impl CoresmdArgs {
    /// Parse an ordered sequence of `key=value` arguments.
    ///
    /// Problems are collected, not fatal; later duplicates win.
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
                "svc_base_uri" => match Url::parse(value) {
                    Ok(url) => cfg.svc_base_uri = Some(url),
                    Err(e) => errs.push(invalid(e.to_string())),
                },
                "ipxe_base_uri" => match Url::parse(value) {
                    Ok(url) => cfg.ipxe_base_uri = Some(url),
                    Err(e) => errs.push(invalid(e.to_string())),
                },
                "ca_cert" => {
                    let path = trim_quotes(value);
                    if !path.is_empty() {
                        cfg.ca_cert = Some(path.to_string());
                    }
                }
                "cache_valid" => match humantime::parse_duration(value) {
                    Ok(d) => cfg.cache_valid = Some(d),
                    Err(e) => errs.push(invalid(e.to_string())),
                },
                "lease_time" => match humantime::parse_duration(value) {
                    Ok(d) => cfg.lease_time = Some(d),
                    Err(e) => errs.push(invalid(e.to_string())),
                },
                "single_port" => match value.parse::<bool>() {
                    Ok(b) => cfg.single_port = b,
                    Err(e) => errs.push(invalid(e.to_string())),
                },
                "tftp_dir" => {
                    let dir = trim_quotes(value);
                    if !dir.is_empty() {
                        cfg.tftp_dir = Some(dir.to_string());
                    }
                }
                "tftp_port" => match value.parse::<u16>() {
                    Ok(port) => cfg.tftp_port = Some(port),
                    Err(_) => errs.push(invalid(
                        "port out of range, must be between 0-65535".to_string(),
                    )),
                },
                "bmc_pattern" => {
                    let pattern = trim_quotes(value);
                    if !pattern.is_empty() {
                        cfg.bmc_pattern = Some(pattern.to_string());
                    }
                }
                "node_pattern" => {
                    let pattern = trim_quotes(value);
                    if !pattern.is_empty() {
                        cfg.node_pattern = Some(pattern.to_string());
                    }
                }
                "domain" => {
                    let domain = trim_quotes(value);
                    if !domain.is_empty() {
                        cfg.domain = Some(domain.to_string());
                    }
                }
                _ => errs.push(ConfigError::UnknownKey {
                    idx,
                    key: key.to_string(),
                }),
            }
        }
        (cfg, errs)
    }

    /// Check invariants and apply defaults.
    ///
    /// Returns the usable configuration plus operator warnings, or the full
    /// set of fatal errors.
    pub fn validate(self) -> Result<(CoresmdConfig, Vec<String>), ConfigFailure> {
        let mut warns = Vec::new();
        let mut errs = Vec::new();

        if self.svc_base_uri.is_none() {
            errs.push(ConfigError::Required {
                key: "svc_base_uri",
            });
        }
        if self.ipxe_base_uri.is_none() {
            errs.push(ConfigError::Required {
                key: "ipxe_base_uri",
            });
        }
        if self.ca_cert.is_none() {
            warns.push("ca_cert unset, TLS certificates will not be validated".to_string());
        }
        let cache_valid = self.cache_valid.unwrap_or_else(|| {
            warns.push(format!(
                "cache_valid unset, defaulting to {}",
                humantime::format_duration(DEFAULT_CACHE_VALID)
            ));
            DEFAULT_CACHE_VALID
        });
        let lease_time = self.lease_time.unwrap_or_else(|| {
            warns.push(format!(
                "lease_time unset, defaulting to {}",
                humantime::format_duration(DEFAULT_LEASE_TIME)
            ));
            DEFAULT_LEASE_TIME
        });
        let tftp_port = match self.tftp_port {
            Some(0) | None => {
                warns.push(format!(
                    "tftp_port unset, defaulting to {DEFAULT_TFTP_PORT}"
                ));
                DEFAULT_TFTP_PORT
            }
            Some(port) => port,
        };
        let tftp_dir = self.tftp_dir.unwrap_or_else(|| {
            warns.push(format!(
                "tftp_dir unset, defaulting to {DEFAULT_TFTP_DIRECTORY}"
            ));
            DEFAULT_TFTP_DIRECTORY.to_string()
        });
        let bmc_pattern = self.bmc_pattern.unwrap_or_else(|| {
            warns.push(format!(
                "bmc_pattern unset, defaulting to {DEFAULT_BMC_PATTERN}"
            ));
            DEFAULT_BMC_PATTERN.to_string()
        });
        let node_pattern = self.node_pattern.unwrap_or_else(|| {
            warns.push(format!(
                "node_pattern unset, defaulting to {DEFAULT_NODE_PATTERN}"
            ));
            DEFAULT_NODE_PATTERN.to_string()
        });
        warns.extend(smd_inventory::hostname::pattern_warnings(&bmc_pattern));
        warns.extend(smd_inventory::hostname::pattern_warnings(&node_pattern));
        if self.domain.is_none() {
            warns.push("domain unset, not configuring".to_string());
        }

        if !errs.is_empty() {
            return Err(ConfigFailure {
                warnings: warns,
                errors: errs,
            });
        }

        Ok((
            CoresmdConfig {
                svc_base_uri: self.svc_base_uri.expect("checked above"),
                ipxe_base_uri: self.ipxe_base_uri.expect("checked above"),
                ca_cert: self.ca_cert,
                cache_valid,
                lease_time,
                single_port: self.single_port,
                tftp_dir,
                tftp_port,
                bmc_pattern,
                node_pattern,
                domain: self.domain,
            },
            warns,
        ))
    }
}
