//! Unit tests for the inventory cache

#[cfg(test)]
mod tests {
    use crate::cache::Cache;
    use crate::error::InventoryError;
    use smd_client::{Component, EthernetInterface, IpEntry, MockSmdClient, RedfishEndpoint};
    use std::sync::Arc;

    fn test_interface(mac: &str, component_id: &str, ips: &[&str]) -> EthernetInterface {
        EthernetInterface {
            mac_address: mac.to_string(),
            component_id: component_id.to_string(),
            kind: "NodeMgmt".to_string(),
            description: String::new(),
            ip_addresses: ips
                .iter()
                .map(|ip| IpEntry {
                    ip_address: ip.to_string(),
                })
                .collect(),
        }
    }

    fn test_component(id: &str, nid: i64, kind: &str) -> Component {
        Component {
            id: id.to_string(),
            nid,
            kind: kind.to_string(),
        }
    }

    fn populated_mock() -> MockSmdClient {
        let mock = MockSmdClient::new("http://smd.test");
        mock.set_ethernet_interfaces(&[test_interface(
            "00:11:22:33:44:55",
            "x3000c0s0b0n0",
            &["192.168.1.10"],
        )]);
        mock.set_components(&[test_component("x3000c0s0b0n0", 1, "Node")]);
        mock.set_redfish_endpoints(&[RedfishEndpoint {
            mac_addr: "DE:CA:FC:0F:FE:E1".to_string(),
            ip_addr: "10.0.0.5".to_string(),
        }]);
        mock
    }

    #[test]
    fn new_rejects_bad_duration() {
        let mock = Arc::new(MockSmdClient::new("http://smd.test"));
        let err = Cache::new("not_a_duration", mock).unwrap_err();
        assert!(matches!(err, InventoryError::InvalidDuration { .. }));
    }

    #[test]
    fn new_accepts_zero_duration() {
        let mock = Arc::new(MockSmdClient::new("http://smd.test"));
        let cache = Cache::new("0s", mock).unwrap();
        assert!(cache.duration().is_zero());
    }

    #[tokio::test]
    async fn refresh_builds_indexed_maps() {
        let mock = Arc::new(populated_mock());
        let cache = Cache::new("30s", mock).unwrap();
        cache.refresh().await.unwrap();

        let snapshot = cache.read().await;
        assert!(snapshot.last_updated.is_some());
        let ei = snapshot
            .ethernet_interfaces
            .get("00:11:22:33:44:55")
            .expect("interface keyed by MAC");
        assert_eq!(ei.component_id, "x3000c0s0b0n0");
        assert_eq!(snapshot.components["x3000c0s0b0n0"].nid, 1);
        // Redfish MACs are canonicalized to lowercase keys
        assert!(snapshot.redfish_endpoints.contains_key("de:ca:fc:0f:fe:e1"));
    }

    #[tokio::test]
    async fn failed_refresh_preserves_previous_snapshot() {
        let mock = Arc::new(populated_mock());
        let cache = Cache::new("30s", mock.clone()).unwrap();
        cache.refresh().await.unwrap();
        let first_updated = cache.read().await.last_updated;

        mock.set_failing(true);
        assert!(cache.refresh().await.is_err());

        let snapshot = cache.read().await;
        assert_eq!(snapshot.last_updated, first_updated);
        assert_eq!(snapshot.ethernet_interfaces.len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_aborts_refresh() {
        let mock = Arc::new(populated_mock());
        let cache = Cache::new("30s", mock.clone()).unwrap();
        cache.refresh().await.unwrap();

        mock.set_body("/hsm/v2/State/Components", "{not json");
        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::Unmarshal {
                collection: "Components",
                ..
            }
        ));
        // prior snapshot still intact
        assert_eq!(cache.read().await.components.len(), 1);
    }

    #[tokio::test]
    async fn without_redfish_skips_the_collection() {
        let mock = Arc::new(populated_mock());
        let cache = Cache::new("30s", mock.clone()).unwrap().without_redfish();
        cache.refresh().await.unwrap();

        assert!(cache.read().await.redfish_endpoints.is_empty());
        // only two collections were fetched
        assert_eq!(mock.get_count(), 2);
    }

    #[tokio::test]
    async fn age_and_sizes_track_refreshes() {
        let mock = Arc::new(populated_mock());
        let cache = Cache::new("30s", mock).unwrap();
        assert_eq!(cache.age().await, None);
        assert_eq!(cache.sizes().await, (0, 0, 0));

        cache.refresh().await.unwrap();
        assert!(cache.age().await.unwrap() < std::time::Duration::from_secs(5));
        assert_eq!(cache.sizes().await, (1, 1, 1));
    }

    #[tokio::test]
    async fn readiness_requires_a_completed_refresh() {
        let mock = Arc::new(populated_mock());
        let cache = Cache::new("30s", mock).unwrap();
        assert!(!cache.ready().await);

        cache.refresh().await.unwrap();
        assert!(cache.ready().await);
    }

    #[tokio::test]
    async fn readers_never_observe_a_mixed_snapshot() {
        // Two inventory generations whose interface and component counts
        // always match; a torn read would surface as a mismatch.
        let mock = Arc::new(MockSmdClient::new("http://smd.test"));
        let generation = |n: usize| {
            let interfaces: Vec<_> = (0..n)
                .map(|i| test_interface(&format!("00:00:00:00:00:{i:02x}"), &format!("n{i}"), &[]))
                .collect();
            let components: Vec<_> = (0..n)
                .map(|i| test_component(&format!("n{i}"), i as i64, "Node"))
                .collect();
            (interfaces, components)
        };

        let (eth1, comp1) = generation(1);
        mock.set_ethernet_interfaces(&eth1);
        mock.set_components(&comp1);
        let cache = Arc::new(Cache::new("30s", mock.clone()).unwrap());
        cache.refresh().await.unwrap();

        let reader_cache = cache.clone();
        let reader = tokio::spawn(async move {
            for _ in 0..200 {
                let snapshot = reader_cache.read().await;
                assert_eq!(
                    snapshot.ethernet_interfaces.len(),
                    snapshot.components.len(),
                    "interfaces and components were published separately"
                );
                drop(snapshot);
                tokio::task::yield_now().await;
            }
        });

        for round in 0..20 {
            let (eth, comp) = generation(if round % 2 == 0 { 7 } else { 3 });
            mock.set_ethernet_interfaces(&eth);
            mock.set_components(&comp);
            cache.refresh().await.unwrap();
            tokio::task::yield_now().await;
        }

        reader.await.unwrap();
    }

    #[test]
    fn readiness_expires_after_the_window() {
        use crate::cache::{snapshot_ready, Snapshot};
        use chrono::{Duration as ChronoDuration, Utc};

        let mut snapshot = Snapshot::default();
        snapshot.components.insert(
            "n1".to_string(),
            test_component("n1", 1, "Node"),
        );

        // never refreshed
        assert!(!snapshot_ready(&snapshot, Utc::now()));

        // fresh refresh
        let now = Utc::now();
        snapshot.last_updated = Some(now);
        assert!(snapshot_ready(&snapshot, now));
        assert!(snapshot_ready(&snapshot, now + ChronoDuration::minutes(4)));

        // past the five-minute window
        assert!(!snapshot_ready(&snapshot, now + ChronoDuration::minutes(6)));
    }

    #[tokio::test]
    async fn readiness_requires_content() {
        let mock = Arc::new(MockSmdClient::new("http://smd.test"));
        mock.set_components(&[]);
        mock.set_redfish_endpoints(&[]);
        let cache = Cache::new("30s", mock).unwrap();
        cache.refresh().await.unwrap();
        // refreshed, but every map is empty
        assert!(!cache.ready().await);
    }
}
