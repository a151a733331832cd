//! DHCP services for cluster boot
//!
//! Two handlers over one shared inventory cache:
//!
//! - **coresmd**: binds MACs known to SMD to their pre-provisioned address
//!   and drives the two-stage iPXE boot (v4 and v6).
//! - **bootloop**: leases short-lived addresses to MACs SMD has never seen,
//!   and NAKs known-but-stale clients back into a full handshake.
//!
//! Handlers compose as a one-hop chain behind the [`server::Dhcpv4Server`]
//! and [`server::Dhcpv6Server`] serve loops.
//!
//! # Example
//!
//! ```no_run
//! use dhcp_server::{CoresmdArgs, CoresmdHandler, Dhcpv4Server, Handler4};
//! use std::sync::Arc;
//!
//! # async fn example(cache: Arc<smd_inventory::Cache>) -> Result<(), Box<dyn std::error::Error>> {
//! let (args, _) = CoresmdArgs::parse(&[
//!     "svc_base_uri=http://smd:27779".to_string(),
//!     "ipxe_base_uri=http://bss:8081".to_string(),
//! ]);
//! let (config, _warnings) = args.validate()?;
//!
//! let chain: Vec<Arc<dyn Handler4>> =
//!     vec![Arc::new(CoresmdHandler::new(cache, config))];
//! let server =
//!     Dhcpv4Server::bind("0.0.0.0:67".parse()?, "192.168.1.1".parse()?, chain).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod bootloop;
pub mod config;
pub mod coresmd;
pub mod debug;
pub mod coresmd6;
pub mod error;
pub mod handler;
pub mod ipxe;
pub mod options;
pub mod options6;
pub mod server;
pub mod storage;

pub use allocator::{AllocatorError, BitmapAllocator};
pub use bootloop::{BootloopArgs, BootloopConfig, BootloopHandler};
pub use config::{ConfigError, ConfigFailure, CoresmdArgs, CoresmdConfig};
pub use coresmd::CoresmdHandler;
pub use coresmd6::CoresmdHandler6;
pub use error::DhcpError;
pub use handler::{Handler4, Handler6, Outcome};
pub use server::{Dhcpv4Server, Dhcpv6Server};
pub use storage::{LeaseRecord, LeaseStore, StorageError};
