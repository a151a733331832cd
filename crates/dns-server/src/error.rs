//! DNS service errors

use thiserror::Error;

/// Errors that can occur in the DNS configuration and serve loop
#[derive(Debug, Error)]
pub enum DnsError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message encode/decode failure
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),

    /// Configuration text could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
}
