//! Persistent lease storage.
//!
//! One embedded sqlite file with a single `leases4` table keyed by MAC.
//! Calls are synchronous on purpose: the bootloop handler persists while
//! holding its state mutex so the in-memory map and the file never diverge
//! within a request.

use mac_address::MacAddress;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;

/// Errors from the lease store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying sqlite failure
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// A persisted MAC column did not hold a MAC address
    #[error("Malformed MAC address in lease table: '{0}'")]
    MalformedMac(String),

    /// A persisted IP column did not hold an IPv4 address
    #[error("Malformed IPv4 address in lease table for {mac}: '{ip}'")]
    MalformedIp { mac: String, ip: String },
}

/// One persisted lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub ip: Ipv4Addr,
    /// Lease end as POSIX seconds.
    pub expires: i64,
    /// Hostname the client declared at allocation time; may be empty.
    pub hostname: String,
}

/// Handle to the lease database.
#[derive(Debug)]
pub struct LeaseStore {
    conn: Connection,
}

impl LeaseStore {
    /// Open (or create) the lease database at `path`.
    ///
    /// Schema creation is idempotent; opening an existing file is a no-op
    /// beyond the connection itself.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS leases4 (
                mac TEXT PRIMARY KEY,
                ip TEXT,
                expiry INTEGER,
                hostname TEXT
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Load every persisted lease, keyed by canonical lowercase MAC.
    ///
    /// Rows with a MAC that does not parse strictly as a hardware address,
    /// or with anything but an IPv4 address in the ip column, are rejected.
    pub fn load_all(&self) -> Result<HashMap<String, LeaseRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT mac, ip, expiry, hostname FROM leases4")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut records = HashMap::new();
        for row in rows {
            let (mac, ip, expires, hostname) = row?;
            let parsed: MacAddress = mac
                .parse()
                .map_err(|_| StorageError::MalformedMac(mac.clone()))?;
            let ip: Ipv4Addr = ip.parse().map_err(|_| StorageError::MalformedIp {
                mac: mac.clone(),
                ip: ip.clone(),
            })?;
            records.insert(
                canonical_mac(&parsed.bytes()),
                LeaseRecord {
                    ip,
                    expires,
                    hostname: hostname.unwrap_or_default(),
                },
            );
        }
        Ok(records)
    }

    /// Insert or replace the lease for `mac`.
    pub fn save(&self, mac: &str, record: &LeaseRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO leases4 (mac, ip, expiry, hostname) VALUES (?1, ?2, ?3, ?4)",
            params![mac, record.ip.to_string(), record.expires, record.hostname],
        )?;
        Ok(())
    }

    /// Remove the lease for `mac`, if any.
    pub fn delete(&self, mac: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM leases4 WHERE mac = ?1", params![mac])?;
        Ok(())
    }
}

/// Canonical lowercase colon-separated rendering of a hardware address.
pub fn canonical_mac(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}
