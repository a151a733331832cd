//! SMD client errors

use thiserror::Error;

/// Errors that can occur when talking to the SMD API
#[derive(Debug, Error)]
pub enum SmdError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured base URL could not be parsed
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// A response body was not the expected JSON shape
    #[error("Failed to decode {collection} response body: {source}")]
    Decode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The CA certificate file could not be read
    #[error("Failed to read CA certificate {path}: {source}")]
    CaCertRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The CA certificate file did not contain a usable PEM bundle
    #[error("Invalid CA certificate bundle {path}: {source}")]
    CaCertParse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}
