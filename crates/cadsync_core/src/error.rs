use thiserror::Error;

/// Unified error type for document synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A shared container or record does not have the shape the caller asked for.
    #[error("schema mismatch in '{container}': expected {expected}, found {found}")]
    Schema {
        /// Name of the container the mismatch was detected in.
        container: String,
        /// What the caller expected to find.
        expected: String,
        /// What was actually there.
        found: String,
    },

    /// A sequence mutation addressed positions outside the container bounds.
    #[error("range {start}+{count} is out of bounds for a sequence of length {len}")]
    Range {
        /// First position of the rejected range.
        start: u32,
        /// Number of positions in the rejected range.
        count: u32,
        /// Length of the sequence at the time of the call.
        len: u32,
    },

    /// The file codec rejected its input or failed to produce output.
    #[error("codec error: {reason}")]
    Codec {
        /// Why the codec failed.
        reason: String,
    },

    /// A replication update could not be decoded or applied.
    #[error("update error: {reason}")]
    Update {
        /// Why the update was rejected.
        reason: String,
    },
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
