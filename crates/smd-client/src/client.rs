//! SMD API client
//!
//! Implements the HTTP GET side of the SMD REST API. The client reads the
//! full response body regardless of HTTP status; callers decide whether a
//! body parses, which keeps refresh failures in one place.

use crate::error::SmdError;
use crate::smd_trait::SmdApi;
use reqwest::{Certificate, Client};
use std::time::Duration;
use tracing::debug;

/// TLS handshake establishment budget for CA-pinned transports.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(120);
/// How long to wait for response headers on a CA-pinned transport.
const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(120);

/// SMD API client
pub struct SmdClient {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl SmdClient {
    /// Create a new SMD client.
    ///
    /// # Arguments
    /// * `base_url` - SMD base URL (e.g., "http://smd:27779")
    pub fn new(base_url: impl Into<String>) -> Result<Self, SmdError> {
        let base_url = base_url.into();
        if reqwest::Url::parse(&base_url).is_err() {
            return Err(SmdError::InvalidBaseUrl(base_url));
        }

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set an access token to be sent as `Authorization: Bearer <token>`.
    pub fn set_bearer_token(&mut self, token: impl Into<String>) {
        self.bearer_token = Some(token.into());
    }

    /// Install a TLS transport that trusts only the PEM bundle at `path`.
    ///
    /// Certificate verification stays enabled, connection keep-alives are
    /// disabled, and the handshake and response-header budgets are capped at
    /// 120 seconds each. The previous transport is replaced wholesale.
    pub fn use_ca_cert(&mut self, path: &str) -> Result<(), SmdError> {
        let pem = std::fs::read(path).map_err(|source| SmdError::CaCertRead {
            path: path.to_string(),
            source,
        })?;

        let certs =
            Certificate::from_pem_bundle(&pem).map_err(|source| SmdError::CaCertParse {
                path: path.to_string(),
                source,
            })?;

        let mut builder = Client::builder()
            .tls_built_in_root_certs(false)
            .danger_accept_invalid_certs(false)
            // no keep-alives: every poll gets a fresh connection
            .pool_max_idle_per_host(0)
            .connect_timeout(TLS_HANDSHAKE_TIMEOUT)
            .read_timeout(RESPONSE_HEADER_TIMEOUT);
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
        self.client = builder.build()?;

        debug!("installed CA-pinned TLS transport from {path}");
        Ok(())
    }

    /// Probe SMD's own readiness endpoint.
    ///
    /// A lightweight startup check so misconfiguration (wrong URL, wrong CA)
    /// surfaces immediately instead of as a string of failed refreshes.
    /// Returns the HTTP status; reachability failures are errors.
    pub async fn probe_ready(&self) -> Result<u16, SmdError> {
        let url = format!("{}/hsm/v2/service/ready", self.base_url);
        debug!("probing SMD readiness at {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().await?;
        Ok(response.status().as_u16())
    }

    /// Issue a GET to `base_url` joined with `path` and return the body.
    ///
    /// A non-2xx status is not an error; the caller parses the body and
    /// decides. Only transport failures (unreachable endpoint, I/O mid-body)
    /// surface as errors.
    pub async fn get(&self, path: &str) -> Result<Vec<u8>, SmdError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("GET {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!("GET {url} -> {status} ({} bytes)", body.len());

        Ok(body.to_vec())
    }
}

#[async_trait::async_trait]
impl SmdApi for SmdClient {
    fn base_url(&self) -> &str {
        self.base_url()
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, SmdError> {
        self.get(path).await
    }
}
