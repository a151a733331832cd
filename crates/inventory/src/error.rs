//! Inventory cache errors

use thiserror::Error;

/// Errors that can occur while building or refreshing the inventory cache
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The refresh duration string could not be parsed
    #[error("Failed to parse cache duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// A collection could not be fetched from SMD
    #[error("Failed to fetch {collection} from SMD: {source}")]
    Fetch {
        collection: &'static str,
        #[source]
        source: smd_client::SmdError,
    },

    /// A fetched body was not the expected JSON shape
    #[error("Failed to unmarshal {collection} data: {source}")]
    Unmarshal {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
