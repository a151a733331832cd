//! DNS service for pattern-synthesized cluster hostnames
//!
//! Answers A/AAAA/PTR queries for node and BMC names inside configured
//! zones, resolved against the shared SMD inventory cache. Names are never
//! stored: forward names are synthesized per query from the zone patterns,
//! and reverse names are decoded back to an address and scanned for.
//!
//! Misses fall through to an optional successor handler; without one the
//! server answers NXDOMAIN.
//!
//! # Example
//!
//! ```no_run
//! use dns_server::{CoresmdDns, DnsConfig, DnsServer};
//! use std::sync::Arc;
//!
//! # async fn example(cache: Arc<smd_inventory::Cache>) -> Result<(), Box<dyn std::error::Error>> {
//! let (config, _warnings) = DnsConfig::parse(
//!     "smd_url http://smd:27779\n\
//!      zone cluster.local { nodes nid{04d}; bmcs bmc-{id} }",
//! )?;
//!
//! let handler = Arc::new(CoresmdDns::new(cache, config.zones.clone()));
//! let server = DnsServer::bind("0.0.0.0:53".parse()?, handler).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod zones;

pub use config::DnsConfig;
pub use error::DnsError;
pub use handler::{CoresmdDns, LookupMetrics, ServeDns, TypeCounters};
pub use server::DnsServer;
pub use zones::Zone;
