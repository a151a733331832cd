//! Zone configuration.

/// One DNS zone this service is authoritative for.
///
/// Patterns use the hostname placeholder grammar: `{0*Nd}` for the
/// zero-padded NID and `{id}` for the component xname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Zone name without a trailing dot, stored lowercase.
    pub name: String,
    pub node_pattern: String,
    pub bmc_pattern: String,
}

impl Zone {
    pub fn new(name: &str, node_pattern: &str, bmc_pattern: &str) -> Self {
        Self {
            name: name.trim_end_matches('.').to_lowercase(),
            node_pattern: node_pattern.to_string(),
            bmc_pattern: bmc_pattern.to_string(),
        }
    }

    /// Whether `name` (lowercase, no trailing dot) falls under this zone.
    pub fn matches(&self, name: &str) -> bool {
        name == self.name || name.ends_with(&format!(".{}", self.name))
    }

    /// `host` qualified into this zone.
    pub fn fqdn(&self, host: &str) -> String {
        format!("{host}.{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::Zone;

    #[test]
    fn zone_name_is_normalized() {
        let zone = Zone::new("Cluster.Local.", "nid{04d}", "bmc-{id}");
        assert_eq!(zone.name, "cluster.local");
    }

    #[test]
    fn matching_requires_a_label_boundary() {
        let zone = Zone::new("cluster.local", "nid{04d}", "bmc-{id}");
        assert!(zone.matches("nid0001.cluster.local"));
        assert!(zone.matches("cluster.local"));
        assert!(!zone.matches("nidcluster.local"));
        assert!(!zone.matches("nid0001.other.local"));
    }

    #[test]
    fn fqdn_joins_host_and_zone() {
        let zone = Zone::new("cluster.local", "nid{04d}", "bmc-{id}");
        assert_eq!(zone.fqdn("nid0001"), "nid0001.cluster.local");
    }
}
