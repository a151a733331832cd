//! Integration tests for the SMD client
//!
//! These tests require a running SMD instance.
//! Set SMD_URL (and optionally SMD_TOKEN) to run.

use smd_client::{SmdApi, SmdClient};

fn client_from_env() -> SmdClient {
    let url = std::env::var("SMD_URL").unwrap_or_else(|_| "http://localhost:27779".to_string());
    let mut client = SmdClient::new(url).expect("Failed to create client");
    if let Ok(token) = std::env::var("SMD_TOKEN") {
        client.set_bearer_token(token);
    }
    client
}

#[tokio::test]
#[ignore] // Requires running SMD instance
async fn test_fetch_ethernet_interfaces() {
    let client = client_from_env();

    let interfaces = client
        .fetch_ethernet_interfaces()
        .await
        .expect("Failed to fetch EthernetInterfaces");

    println!("Found {} ethernet interfaces", interfaces.len());
}

#[tokio::test]
#[ignore]
async fn test_fetch_components() {
    let client = client_from_env();

    let components = client
        .fetch_components()
        .await
        .expect("Failed to fetch Components");

    println!("Found {} components", components.len());
}

#[tokio::test]
#[ignore]
async fn test_probe_ready() {
    let client = client_from_env();

    let status = client
        .probe_ready()
        .await
        .expect("SMD readiness endpoint should be reachable");
    assert!((200..300).contains(&status), "SMD not ready: {status}");
}

#[tokio::test]
#[ignore]
async fn test_body_returned_for_error_status() {
    let client = client_from_env();

    // A bogus path should still yield a body (SMD's error document), not a
    // transport error.
    let body = client
        .get("/hsm/v2/No/Such/Collection")
        .await
        .expect("transport should succeed even on 404");
    assert!(!body.is_empty());
}
