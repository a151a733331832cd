//! TFTP file delivery for the boot path
//!
//! Serves the iPXE binaries (and anything else pre-curated into the serve
//! directory) to PXE ROMs. Read-only: write requests are refused. The
//! special filename `default` streams a built-in one-command iPXE script
//! that reboots the machine, which is what an undiscovered host should do
//! until someone tells it otherwise.
//!
//! Two transfer modes: classic (each transfer from its own ephemeral port)
//! and single-port (everything from the listen port, for clients whose
//! firewalls or ROMs cannot track a port change).
//!
//! # Example
//!
//! ```no_run
//! use tftp_server::TftpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TftpServer::new("/tftpboot", 69, false);
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod packet;
pub mod server;

pub use error::TftpError;
pub use server::{TftpServer, DEFAULT_SCRIPT, DEFAULT_SCRIPT_NAME};
