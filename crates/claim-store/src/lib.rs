//! Durable storage for the bazaar claim engine.
//!
//! Persists events, sellers, articles, checkout and billing sessions, and the
//! exclusive claim slots that tie articles to sessions. Two implementations
//! share the [`BazaarStore`] trait: [`MemoryStore`] for tests and ephemeral
//! embeddings, [`PostgresStore`] for production.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    ArticleRecord, BillingRecord, CheckoutRecord, ClaimKind, ClaimLine, ClaimRecord, EventRecord,
    SellerRecord, SellerRole, SessionStatus, Version,
};
pub use store::{BazaarStore, BillingSnapshot, CheckoutSnapshot, ClaimOutcome};
