//! Shared types for the bazaar claim engine.
//!
//! Strongly typed UUID identifiers for every entity kind, plus the [`Money`]
//! value type used for article prices, checkout totals, and seller payouts.

pub mod ids;
pub mod money;

pub use ids::{ArticleId, BillingId, CheckoutId, EventId, SellerId, UserId};
pub use money::Money;
