//! TFTP service errors

use thiserror::Error;

/// Errors that can occur in the TFTP server
#[derive(Debug, Error)]
pub enum TftpError {
    /// Socket or filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An incoming datagram was not a valid TFTP packet
    #[error("Malformed TFTP packet: {0}")]
    Malformed(&'static str),

    /// The peer stopped the transfer with an error packet
    #[error("Transfer aborted by peer: {code} {message}")]
    PeerError { code: u16, message: String },

    /// The peer went quiet past the retransmit budget
    #[error("Transfer timed out waiting for ACK of block {block}")]
    Timeout { block: u16 },
}
