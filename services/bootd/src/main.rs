//! bootd: boot-time network services for a compute cluster.
//!
//! One process, one inventory: a single SMD client and cache are created at
//! startup and injected into every handler, then the configured services
//! (DHCPv4/v6, DNS, TFTP) run as tasks on one runtime.

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::BootdConfig;
use dhcp_server::{
    BootloopArgs, BootloopHandler, CoresmdArgs, CoresmdConfig, CoresmdHandler, CoresmdHandler6,
    Dhcpv4Server, Dhcpv6Server, Handler4, Handler6,
};
use dns_server::{CoresmdDns, DnsConfig, DnsServer};
use futures::future::select_all;
use smd_client::SmdClient;
use smd_inventory::Cache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tftp_server::TftpServer;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bootd", about = "SMD-driven DHCP, DNS, and TFTP boot services")]
struct Args {
    /// Path to the bootd configuration file
    #[arg(short, long, default_value = "/etc/smdboot/bootd.conf")]
    config: PathBuf,
}

/// Process-wide shared state: one client, one cache, for every handler.
struct SharedState {
    cache: Arc<Cache>,
}

impl SharedState {
    async fn new(smd_url: &str, ca_cert: Option<&str>, cache_valid: Duration) -> Result<Self> {
        let mut client = SmdClient::new(smd_url).context("failed to create SMD client")?;
        match ca_cert {
            Some(path) => {
                client
                    .use_ca_cert(path)
                    .context("failed to set CA certificate")?;
                info!("set CA certificate for SMD to the contents of {path}");
            }
            None => info!("CA certificate path was empty, not setting"),
        }

        // not fatal: SMD may simply not be up yet, the refresher retries
        match client.probe_ready().await {
            Ok(status) if (200..300).contains(&status) => info!("SMD at {smd_url} is ready"),
            Ok(status) => warn!("SMD at {smd_url} answered readiness probe with {status}"),
            Err(err) => warn!("SMD at {smd_url} is unreachable: {err}"),
        }

        let duration = humantime::format_duration(cache_valid).to_string();
        let cache = Cache::new(&duration, Arc::new(client)).context("failed to create cache")?;
        Ok(Self {
            cache: Arc::new(cache),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("starting bootd with config {}", args.config.display());
    let config = BootdConfig::load(&args.config)?;

    // Validate handler configurations up front; fatal errors abort startup
    // before any socket is bound.
    let coresmd_config = match &config.coresmd {
        Some(argv) => Some(validate_coresmd(argv)?),
        None => None,
    };
    let bootloop_handler = match &config.bootloop {
        Some(argv) => Some(Arc::new(validate_bootloop(argv)?)),
        None => None,
    };
    let dns_config = match &config.dns {
        Some(text) => {
            let (parsed, warns) = DnsConfig::parse(text)?;
            for warning in warns {
                warn!("{warning}");
            }
            Some(parsed)
        }
        None => None,
    };

    if coresmd_config.is_none() && bootloop_handler.is_none() && dns_config.is_none() {
        bail!("nothing to serve: configure at least one of [coresmd], [bootloop], [dns]");
    }

    // One cache for the whole process. The coresmd settings win when both
    // sides name an SMD; the DNS section stands alone otherwise.
    let state = match (&coresmd_config, &dns_config) {
        (Some(coresmd), dns) => {
            if let Some(dns) = dns {
                if dns.smd_url.as_str() != coresmd.svc_base_uri.as_str() {
                    warn!(
                        "[dns] smd_url {} differs from [coresmd] svc_base_uri {}; using the latter",
                        dns.smd_url, coresmd.svc_base_uri
                    );
                }
            }
            Some(
                SharedState::new(
                    coresmd.svc_base_uri.as_str(),
                    coresmd.ca_cert.as_deref(),
                    coresmd.cache_valid,
                )
                .await?,
            )
        }
        (None, Some(dns)) => Some(
            SharedState::new(
                dns.smd_url.as_str(),
                dns.ca_cert.as_deref(),
                dns.cache_duration,
            )
            .await?,
        ),
        (None, None) => None,
    };

    let mut services: Vec<JoinHandle<()>> = Vec::new();

    if let Some(state) = &state {
        let cache = state.cache.clone();
        services.push(tokio::spawn(async move {
            cache.refresh_loop().await;
        }));

        // readiness transitions are the operator's drain signal
        let cache = state.cache.clone();
        tokio::spawn(async move {
            let mut ready = false;
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let now = cache.ready().await;
                if now != ready {
                    ready = now;
                    let (interfaces, components, redfish) = cache.sizes().await;
                    if ready {
                        info!(
                            "inventory cache is ready: {interfaces} interfaces, \
                             {components} components, {redfish} redfish endpoints"
                        );
                    } else {
                        let age = cache
                            .age()
                            .await
                            .map(|age| humantime::format_duration(age).to_string())
                            .unwrap_or_else(|| "never refreshed".to_string());
                        warn!("inventory cache is stale (age {age}), readiness withdrawn");
                    }
                }
            }
        });
    }

    // DHCPv4: coresmd first, bootloop as the fallback for unknown MACs
    let mut chain4: Vec<Arc<dyn Handler4>> = Vec::new();
    if let Some(coresmd) = &coresmd_config {
        let cache = state.as_ref().expect("coresmd implies shared state").cache.clone();
        chain4.push(Arc::new(CoresmdHandler::new(cache, coresmd.clone())));
        info!("coresmd handler initialized with {coresmd}");
    }
    if let Some(bootloop) = &bootloop_handler {
        chain4.push(bootloop.clone() as Arc<dyn Handler4>);
    }
    if !chain4.is_empty() {
        let Some(server_ip) = config.server.server_ip else {
            bail!("[server] server_ip is required when a DHCP handler is configured");
        };
        let server = Dhcpv4Server::bind(config.server.dhcp_listen, server_ip, chain4)
            .await
            .context("failed to start DHCPv4 server")?;
        services.push(spawn_service("dhcpv4", async move { server.run().await }));
    }

    // DHCPv6 is coresmd-only; bootloop refuses the protocol
    if let Some(listen6) = config.server.dhcp6_listen {
        let Some(coresmd) = &coresmd_config else {
            bail!("[server] dhcp6_listen needs the [coresmd] section");
        };
        let Some(server_ip6) = config.server.server_ip6 else {
            bail!("[server] server_ip6 is required when dhcp6_listen is set");
        };
        let cache = state.as_ref().expect("coresmd implies shared state").cache.clone();
        let chain6: Vec<Arc<dyn Handler6>> = vec![Arc::new(CoresmdHandler6::new(
            cache,
            coresmd.clone(),
            server_ip6,
        ))];
        let server = Dhcpv6Server::bind(listen6, server_ip6, chain6)
            .await
            .context("failed to start DHCPv6 server")?;
        services.push(spawn_service("dhcpv6", async move { server.run().await }));
    }

    if let Some(dns) = &dns_config {
        let cache = state.as_ref().expect("dns implies shared state").cache.clone();
        let handler = Arc::new(CoresmdDns::new(cache, dns.zones.clone()));
        let server = DnsServer::bind(config.server.dns_listen, handler)
            .await
            .context("failed to start DNS server")?;
        services.push(spawn_service("dns", async move { server.run().await }));
    }

    // TFTP rides along with coresmd: it serves the directory the DHCP
    // handler advertises bootfiles from.
    if let Some(coresmd) = &coresmd_config {
        info!(
            "starting TFTP server on port {} with directory {}",
            coresmd.tftp_port, coresmd.tftp_dir
        );
        let server = TftpServer::new(
            coresmd.tftp_dir.clone(),
            coresmd.tftp_port,
            coresmd.single_port,
        );
        services.push(spawn_service("tftp", async move { server.run().await }));
    }

    // Every service runs until the process dies; one of them finishing is
    // itself a failure worth exiting over.
    let (_, index, _) = select_all(services).await;
    bail!("service task {index} exited unexpectedly");
}

fn spawn_service<E>(
    name: &'static str,
    fut: impl std::future::Future<Output = Result<(), E>> + Send + 'static,
) -> JoinHandle<()>
where
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            error!("{name} service failed: {err}");
        }
    })
}

fn validate_coresmd(argv: &[String]) -> Result<CoresmdConfig> {
    let (parsed, parse_errs) = CoresmdArgs::parse(argv);
    for err in &parse_errs {
        error!("{err}");
    }
    match parsed.validate() {
        Ok((config, warns)) => {
            for warning in warns {
                warn!("{warning}");
            }
            Ok(config)
        }
        Err(failure) => {
            for warning in &failure.warnings {
                warn!("{warning}");
            }
            for err in &failure.errors {
                error!("{err}");
            }
            bail!("[coresmd]: {failure}");
        }
    }
}

fn validate_bootloop(argv: &[String]) -> Result<BootloopHandler> {
    let (parsed, parse_errs) = BootloopArgs::parse(argv);
    for err in &parse_errs {
        error!("{err}");
    }
    match parsed.validate() {
        Ok((config, warns)) => {
            for warning in warns {
                warn!("{warning}");
            }
            let handler = BootloopHandler::from_config(&config)
                .context("failed to initialize bootloop handler")?;
            info!("bootloop handler initialized with {config}");
            Ok(handler)
        }
        Err(failure) => {
            for warning in &failure.warnings {
                warn!("{warning}");
            }
            for err in &failure.errors {
                error!("{err}");
            }
            bail!("[bootloop]: {failure}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn coresmd_section_validates() {
        let config = validate_coresmd(&args(&[
            "svc_base_uri=http://smd:27779",
            "ipxe_base_uri=http://bss:8081",
        ]))
        .unwrap();
        assert_eq!(config.tftp_port, 69);
    }

    #[test]
    fn coresmd_fatal_errors_abort() {
        let err = validate_coresmd(&args(&["lease_time=5m"])).unwrap_err();
        assert!(err.to_string().contains("[coresmd]"));
    }

    #[test]
    fn bootloop_section_builds_a_working_handler() {
        let dir = TempDir::new().unwrap();
        let handler = validate_bootloop(&args(&[
            &format!("lease_file={}", dir.path().join("leases.db").display()),
            "ipv4_start=10.0.0.5",
            "ipv4_end=10.0.0.20",
        ]))
        .unwrap();
        assert!(handler.ip_is_free("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn bootloop_missing_range_aborts() {
        let err = validate_bootloop(&args(&["lease_file=/tmp/leases.db"])).unwrap_err();
        assert!(err.to_string().contains("[bootloop]"));
    }
}
