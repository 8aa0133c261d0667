//! Persisted record types.
//!
//! These are the storage shapes of the bazaar entities. The `domain` crate
//! layers validation and orchestration on top; the store persists and
//! retrieves them without interpreting business rules, with two exceptions it
//! alone can guarantee: uniqueness constraints and the atomic claim
//! check-and-set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{ArticleId, BillingId, CheckoutId, EventId, Money, SellerId, UserId};

/// Version number for a session row, used for optimistic concurrency control.
///
/// Sessions are inserted at version 1; every finalizer bumps the version by
/// one, so a concurrent complete and cancel can never both win.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the first version (1), assigned on insert.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two independent claim axes of an article.
///
/// A checkout claim and a billing claim on the same article coexist; two
/// claims of the same kind do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// Buyer-facing sale claim.
    Checkout,
    /// Seller-facing payout claim.
    Billing,
}

impl ClaimKind {
    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::Checkout => "checkout",
            ClaimKind::Billing => "billing",
        }
    }

    /// Parses the storage representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "checkout" => Some(ClaimKind::Checkout),
            "billing" => Some(ClaimKind::Billing),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One bazaar event; the namespace for sellers, articles, and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub registration_opens_at: DateTime<Utc>,
    pub registration_closes_at: DateTime<Utc>,
    /// After this instant sellers can no longer edit their articles.
    /// `None` means no deadline beyond the claim-based locking.
    pub article_edit_deadline: Option<DateTime<Utc>>,
    /// Commission percentage (0-100) withheld from seller payouts.
    pub commission_percent: u8,
}

/// Seller role, determining the article quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerRole {
    Standard,
    Helper,
    Orga,
    TeamLead,
}

impl SellerRole {
    /// Maximum number of articles a seller of this role may submit.
    pub fn max_article_count(&self) -> u32 {
        match self {
            SellerRole::Standard => 50,
            SellerRole::Helper => 100,
            SellerRole::Orga => 150,
            SellerRole::TeamLead => 200,
        }
    }

    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SellerRole::Standard => "standard",
            SellerRole::Helper => "helper",
            SellerRole::Orga => "orga",
            SellerRole::TeamLead => "team_lead",
        }
    }

    /// Parses the storage representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(SellerRole::Standard),
            "helper" => Some(SellerRole::Helper),
            "orga" => Some(SellerRole::Orga),
            "team_lead" => Some(SellerRole::TeamLead),
            _ => None,
        }
    }
}

impl std::fmt::Display for SellerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered seller of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerRecord {
    pub id: SellerId,
    pub event_id: EventId,
    pub user_id: UserId,
    /// Printed on every tag of this seller; unique within the event.
    pub seller_number: u32,
    pub role: SellerRole,
    /// Whether billing sessions may be opened for this seller.
    pub can_bill: bool,
}

/// A priced article owned by one seller.
///
/// Claim state is deliberately absent here; it lives in the claim table,
/// keyed by `(kind, article_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: ArticleId,
    pub seller_id: SellerId,
    /// Denormalized from the seller, for event-scoped lookups.
    pub event_id: EventId,
    /// Printed on the tag together with the seller number; unique within the
    /// seller.
    pub label_number: u32,
    pub name: String,
    pub size: Option<String>,
    pub price: Money,
}

/// Session lifecycle status, shared by checkouts and billings.
///
/// ```text
/// InProgress ──┬──► Completed
///              └──► Cancelled
/// ```
///
/// Both right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    /// Returns true while claims may still be added or released.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SessionStatus::InProgress)
    }

    /// Returns true once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the storage representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A buyer-facing checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub id: CheckoutId,
    pub event_id: EventId,
    pub operator: UserId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub version: Version,
    pub completed_at: Option<DateTime<Utc>>,
    /// Snapshot taken at completion; `None` while in progress.
    pub article_count: Option<u32>,
    /// Snapshot taken at completion; `None` while in progress.
    pub total: Option<Money>,
}

impl CheckoutRecord {
    /// Creates a fresh in-progress checkout at version 1.
    pub fn new(
        id: CheckoutId,
        event_id: EventId,
        operator: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            operator,
            created_at,
            status: SessionStatus::InProgress,
            version: Version::first(),
            completed_at: None,
            article_count: None,
            total: None,
        }
    }
}

/// A seller-facing billing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: BillingId,
    pub event_id: EventId,
    pub seller_id: SellerId,
    pub operator: UserId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub version: Version,
    pub completed_at: Option<DateTime<Utc>>,
    /// Snapshot taken at completion; `None` while in progress.
    pub article_count: Option<u32>,
    /// Snapshot taken at completion; `None` while in progress.
    pub total: Option<Money>,
    /// Commission-adjusted amount owed to the seller, fixed at completion.
    pub payout: Option<Money>,
}

impl BillingRecord {
    /// Creates a fresh in-progress billing at version 1.
    pub fn new(
        id: BillingId,
        event_id: EventId,
        seller_id: SellerId,
        operator: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            seller_id,
            operator,
            created_at,
            status: SessionStatus::InProgress,
            version: Version::first(),
            completed_at: None,
            article_count: None,
            total: None,
            payout: None,
        }
    }
}

/// One exclusive claim: `(kind, article)` held by one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub kind: ClaimKind,
    pub article_id: ArticleId,
    /// The holding session. Kept as a bare UUID so the claim primitive stays
    /// agnostic of the session type; checkout and billing managers convert
    /// their typed ids at the boundary.
    pub session_id: Uuid,
    /// Store-assigned, monotonically increasing; gives stable display order.
    pub position: i64,
    pub claimed_at: DateTime<Utc>,
}

/// An article id with its current price, read in one consistent snapshot.
/// Backs running-total computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimLine {
    pub article_id: ArticleId,
    pub price: Money,
}
