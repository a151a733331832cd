//! SMD API models
//!
//! These models match the subset of the SMD REST serializers consumed by the
//! boot services. Field names on the wire are PascalCase; unknown fields are
//! ignored so the models survive SMD additions.

use serde::{Deserialize, Serialize};

/// One IP assignment inside an ethernet interface record.
///
/// SMD wraps each address in an object so it can attach metadata later; only
/// the address itself is consumed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpEntry {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
}

/// Ethernet interface record from `/hsm/v2/Inventory/EthernetInterfaces`.
///
/// The MAC is the lookup key for DHCP; the order of `ip_addresses` matters:
/// the first entry of the wanted family is the preferred assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetInterface {
    #[serde(rename = "MACAddress")]
    pub mac_address: String,
    #[serde(rename = "ComponentID", default)]
    pub component_id: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "IPAddresses", default)]
    pub ip_addresses: Vec<IpEntry>,
}

/// Component record from `/hsm/v2/State/Components`.
///
/// `kind` distinguishes nodes (`"Node"`) from their management controllers
/// (`"NodeBMC"`); `nid` is only meaningful for nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "NID", default)]
    pub nid: i64,
    #[serde(rename = "Type", default)]
    pub kind: String,
}

/// Envelope for the Components collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsEnvelope {
    #[serde(rename = "Components", default)]
    pub components: Vec<Component>,
}

/// Redfish endpoint record from `/hsm/v2/Inventory/RedfishEndpoints`.
///
/// Used as a fallback for BMC discovery when no ethernet interface record
/// exists for the MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedfishEndpoint {
    #[serde(rename = "MACAddr", default)]
    pub mac_addr: String,
    #[serde(rename = "IPAddr", default)]
    pub ip_addr: String,
}

/// Envelope for the RedfishEndpoints collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedfishEndpointsEnvelope {
    #[serde(rename = "RedfishEndpoints", default)]
    pub redfish_endpoints: Vec<RedfishEndpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_interface_decodes_wire_format() {
        let body = r#"[
            {
                "MACAddress": "00:11:22:33:44:55",
                "ComponentID": "x3000c0s0b0n0",
                "Type": "NodeMgmt",
                "Description": "mgmt0",
                "IPAddresses": [{"IPAddress": "192.168.1.10"}, {"IPAddress": "fd00::10"}],
                "LastUpdate": "2024-01-01T00:00:00Z"
            }
        ]"#;
        let parsed: Vec<EthernetInterface> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].mac_address, "00:11:22:33:44:55");
        assert_eq!(parsed[0].component_id, "x3000c0s0b0n0");
        assert_eq!(parsed[0].ip_addresses[0].ip_address, "192.168.1.10");
    }

    #[test]
    fn ethernet_interface_tolerates_missing_addresses() {
        let body = r#"[{"MACAddress": "aa:bb:cc:dd:ee:ff"}]"#;
        let parsed: Vec<EthernetInterface> = serde_json::from_str(body).unwrap();
        assert!(parsed[0].ip_addresses.is_empty());
        assert!(parsed[0].component_id.is_empty());
    }

    #[test]
    fn components_envelope_decodes() {
        let body = r#"{"Components": [{"ID": "x3000c0s0b0n0", "NID": 1, "Type": "Node"}]}"#;
        let parsed: ComponentsEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.components[0].nid, 1);
        assert_eq!(parsed.components[0].kind, "Node");
    }

    #[test]
    fn redfish_envelope_ignores_extra_fields() {
        let body = r#"{"RedfishEndpoints": [
            {"MACAddr": "de:ca:fc:0f:fe:e1", "IPAddr": "10.0.0.5", "FQDN": "bmc.local"}
        ]}"#;
        let parsed: RedfishEndpointsEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.redfish_endpoints[0].ip_addr, "10.0.0.5");
    }
}
