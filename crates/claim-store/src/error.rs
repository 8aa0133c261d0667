use thiserror::Error;
use uuid::Uuid;

use common::{EventId, SellerId};

use crate::records::Version;

/// Errors that can occur when interacting with the bazaar store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A version-checked session update lost a race.
    /// The expected version did not match the actual version.
    #[error("version conflict for session {session_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        session_id: Uuid,
        expected: Version,
        actual: Version,
    },

    /// A session finalizer was called for a session that does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Completion was attempted for a session holding no claims.
    #[error("session {0} holds no claims")]
    EmptySession(Uuid),

    /// The seller number is already taken within the event.
    #[error("seller number {seller_number} is already taken in event {event_id}")]
    DuplicateSellerNumber {
        event_id: EventId,
        seller_number: u32,
    },

    /// The label number is already taken within the seller.
    #[error("label number {label_number} is already taken for seller {seller_id}")]
    DuplicateLabelNumber {
        seller_id: SellerId,
        label_number: u32,
    },

    /// A stored enum column holds a value this build does not recognize.
    #[error("unrecognized {0} value in storage: {1}")]
    InvalidColumn(&'static str, String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
