//! DHCP service errors

use crate::allocator::AllocatorError;
use crate::storage::StorageError;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors that can occur in the DHCP handlers and serve loops
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Socket or filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An incoming packet was not a valid DHCP message
    #[error("Failed to decode DHCP message: {0}")]
    Decode(#[from] dhcproto::error::DecodeError),

    /// A response could not be serialized
    #[error("Failed to encode DHCP message: {0}")]
    Encode(#[from] dhcproto::error::EncodeError),

    /// Startup configuration had fatal errors
    #[error("{count} fatal configuration errors occurred, exiting")]
    Config { count: usize },

    /// IP allocation failed
    #[error("Allocator error: {0}")]
    Allocator(#[from] AllocatorError),

    /// Lease persistence failed
    #[error("Lease storage error: {0}")]
    Storage(#[from] StorageError),

    /// The lease file disagrees with the configured address range
    #[error(
        "Persisted lease for {mac} re-allocated to {got}, expected {want}; \
         lease file is inconsistent with the configured range"
    )]
    LeaseReload {
        mac: String,
        want: Ipv4Addr,
        got: Ipv4Addr,
    },

    /// A lease backing store was registered twice
    #[error("A lease backing store is already registered")]
    BackingAlreadyRegistered,

    /// The handler does not speak the requested protocol version
    #[error("{handler} does not currently support DHCPv6")]
    UnsupportedProtocol { handler: &'static str },
}
