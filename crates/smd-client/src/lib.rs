//! SMD REST API Client
//!
//! A Rust client library for reading inventory from the State Management
//! Database (SMD). Provides type-safe models for the collections the boot
//! services consume (ethernet interfaces, components, Redfish endpoints).
//!
//! # Example
//!
//! ```no_run
//! use smd_client::SmdClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a client
//! let mut client = SmdClient::new("http://smd:27779")?;
//!
//! // Optionally pin the trust root to a site CA bundle
//! client.use_ca_cert("/etc/smdboot/smd-ca.pem")?;
//!
//! // Fetch a collection; the body is returned regardless of HTTP status
//! let body = client.get("/hsm/v2/Inventory/EthernetInterfaces").await?;
//! let interfaces: Vec<smd_client::EthernetInterface> = serde_json::from_slice(&body)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **CA pinning**: an optional PEM bundle becomes the only trust root
//! - **Bearer auth**: an optional access token sent on every request
//! - **Mocking**: `test-util` enables an in-memory [`MockSmdClient`]

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod smd_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::SmdClient;
pub use error::SmdError;
pub use models::*;
pub use smd_trait::{
    SmdApi, COMPONENTS_PATH, ETHERNET_INTERFACES_PATH, REDFISH_ENDPOINTS_PATH,
};
#[cfg(feature = "test-util")]
pub use mock::MockSmdClient;
