//! SmdApi trait for mocking
//!
//! Abstracts the SMD client so the inventory cache and its consumers can be
//! exercised in unit tests without a running SMD instance. The concrete
//! [`SmdClient`](crate::SmdClient) implements this trait; tests use
//! [`MockSmdClient`](crate::mock::MockSmdClient).
//!
//! The typed collection fetches are default methods over `get`, so every
//! implementation (including mocks) gets them for free.

use crate::error::SmdError;
use crate::models::*;

/// Inventory collection paths on the SMD API.
pub const ETHERNET_INTERFACES_PATH: &str = "/hsm/v2/Inventory/EthernetInterfaces";
pub const COMPONENTS_PATH: &str = "/hsm/v2/State/Components";
pub const REDFISH_ENDPOINTS_PATH: &str = "/hsm/v2/Inventory/RedfishEndpoints";

/// Trait for SMD API read operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing
/// runtime.
#[async_trait::async_trait]
pub trait SmdApi: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Issue a GET and return the raw body regardless of HTTP status.
    async fn get(&self, path: &str) -> Result<Vec<u8>, SmdError>;

    /// Fetch and decode the EthernetInterfaces collection.
    async fn fetch_ethernet_interfaces(&self) -> Result<Vec<EthernetInterface>, SmdError> {
        let body = self.get(ETHERNET_INTERFACES_PATH).await?;
        serde_json::from_slice(&body).map_err(|source| SmdError::Decode {
            collection: "EthernetInterfaces",
            source,
        })
    }

    /// Fetch and decode the Components collection.
    async fn fetch_components(&self) -> Result<Vec<Component>, SmdError> {
        let body = self.get(COMPONENTS_PATH).await?;
        let envelope: ComponentsEnvelope =
            serde_json::from_slice(&body).map_err(|source| SmdError::Decode {
                collection: "Components",
                source,
            })?;
        Ok(envelope.components)
    }

    /// Fetch and decode the RedfishEndpoints collection.
    async fn fetch_redfish_endpoints(&self) -> Result<Vec<RedfishEndpoint>, SmdError> {
        let body = self.get(REDFISH_ENDPOINTS_PATH).await?;
        let envelope: RedfishEndpointsEnvelope =
            serde_json::from_slice(&body).map_err(|source| SmdError::Decode {
                collection: "RedfishEndpoints",
                source,
            })?;
        Ok(envelope.redfish_endpoints)
    }
}
