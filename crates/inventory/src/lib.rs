//! Shared inventory state for the boot services
//!
//! One [`Cache`] instance per process holds the three SMD collections as
//! indexed maps behind a reader/writer lock. A single background task
//! refreshes it; the DHCP and DNS handlers read it. The crate also carries
//! the two small pieces of naming logic both protocol sides need: hostname
//! pattern expansion and reverse-DNS name decoding.

pub mod cache;
mod cache_test;
pub mod error;
pub mod hostname;
pub mod rdns;

pub use cache::{Cache, Snapshot, READINESS_WINDOW};
pub use error::InventoryError;
