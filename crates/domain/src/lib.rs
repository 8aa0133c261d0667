//! Article claim engine for a recurring children's bazaar.
//!
//! This crate provides the bookkeeping core:
//! - [`EventDirectory`] and [`SellerDirectory`] manage the bazaar namespace
//! - [`ArticleRegistry`] owns the article lifecycle and both lookup paths
//! - [`ClaimLedger`] is the generic exclusive-claim primitive
//! - [`CheckoutManager`] and [`BillingManager`] orchestrate the two session
//!   kinds on their independent claim axes
//!
//! All state lives behind the [`claim_store::BazaarStore`] trait; the engine
//! itself never retries, never reads system time outside [`clock`], and
//! returns every domain failure as a typed error.

pub mod billing;
pub mod checkout;
pub mod clock;
pub mod event;
pub mod ledger;
pub mod registry;
pub mod seller;

#[cfg(test)]
mod testsupport;

pub use billing::{BillingError, BillingManager, BillingSettlement};
pub use checkout::{CheckoutError, CheckoutManager, CheckoutTotal};
pub use clock::{Clock, FixedClock, SystemClock};
pub use event::{EventDirectory, EventError, NewEvent};
pub use ledger::{ClaimError, ClaimLedger};
pub use registry::{ArticleRegistry, RegistryError};
pub use seller::{SellerDirectory, SellerError};

pub use claim_store::{
    ArticleRecord, BazaarStore, BillingRecord, CheckoutRecord, ClaimKind, EventRecord,
    MemoryStore, PostgresStore, SellerRecord, SellerRole, SessionStatus,
};
pub use common::{ArticleId, BillingId, CheckoutId, EventId, Money, SellerId, UserId};
