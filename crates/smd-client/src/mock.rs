//! Mock SmdClient for unit testing
//!
//! Stores canned response bodies per path and can be flipped into a failing
//! mode to exercise refresh error paths, all without a running SMD.

use crate::error::SmdError;
use crate::models::*;
use crate::smd_trait::SmdApi;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock SmdClient for testing
///
/// Responses are keyed by request path. Unknown paths return an empty JSON
/// array, which mirrors an SMD with nothing in inventory.
#[derive(Clone, Default)]
pub struct MockSmdClient {
    base_url: String,
    routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: Arc<Mutex<bool>>,
    get_count: Arc<Mutex<usize>>,
}

impl MockSmdClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the raw body returned for a path (for test setup)
    pub fn set_body(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), body.into());
    }

    /// Serve the given ethernet interfaces from the inventory path
    pub fn set_ethernet_interfaces(&self, interfaces: &[EthernetInterface]) {
        let body = serde_json::to_vec(interfaces).unwrap();
        self.set_body("/hsm/v2/Inventory/EthernetInterfaces", body);
    }

    /// Serve the given components from the state path
    pub fn set_components(&self, components: &[Component]) {
        let body = serde_json::to_vec(&ComponentsEnvelope {
            components: components.to_vec(),
        })
        .unwrap();
        self.set_body("/hsm/v2/State/Components", body);
    }

    /// Serve the given Redfish endpoints from the inventory path
    pub fn set_redfish_endpoints(&self, endpoints: &[RedfishEndpoint]) {
        let body = serde_json::to_vec(&RedfishEndpointsEnvelope {
            redfish_endpoints: endpoints.to_vec(),
        })
        .unwrap();
        self.set_body("/hsm/v2/Inventory/RedfishEndpoints", body);
    }

    /// Make every subsequent request fail as unreachable
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Number of GETs issued against this mock
    pub fn get_count(&self) -> usize {
        *self.get_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl SmdApi for MockSmdClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, SmdError> {
        *self.get_count.lock().unwrap() += 1;
        if *self.failing.lock().unwrap() {
            return Err(SmdError::InvalidBaseUrl(format!(
                "mock endpoint unreachable: {path}"
            )));
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| b"[]".to_vec()))
    }
}
