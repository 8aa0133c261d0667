use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use common::{ArticleId, BillingId, CheckoutId, EventId, Money, SellerId};

use crate::records::{
    ArticleRecord, BillingRecord, CheckoutRecord, ClaimKind, ClaimLine, ClaimRecord, EventRecord,
    SellerRecord, Version,
};
use crate::Result;

/// Outcome of the atomic claim check-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim is held by the requesting session after the call — either
    /// freshly taken or an idempotent re-claim by the same session.
    Granted,
    /// Another session already holds the claim.
    Held {
        /// The winning session.
        holder: Uuid,
    },
}

/// The result frozen onto a checkout by its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutSnapshot {
    pub version: Version,
    pub article_count: u32,
    pub total: Money,
}

/// The result frozen onto a billing by its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingSnapshot {
    pub version: Version,
    pub article_count: u32,
    pub total: Money,
    pub payout: Money,
}

/// Core trait for bazaar storage implementations.
///
/// The store persists events, sellers, articles, sessions, and claims, and
/// guarantees two things the layers above cannot: uniqueness constraints
/// (seller numbers, label numbers, claim slots) and atomicity of
/// [`try_claim`](BazaarStore::try_claim) and the session finalizers.
/// All implementations must be thread-safe (`Send + Sync`) and must remain
/// correct when several independent processes share the same backing state.
#[async_trait]
pub trait BazaarStore: Send + Sync {
    // --- events ---

    /// Persists a new bazaar event.
    async fn insert_event(&self, event: EventRecord) -> Result<()>;

    /// Retrieves an event, or `None` if it does not exist.
    async fn event(&self, id: EventId) -> Result<Option<EventRecord>>;

    // --- sellers ---

    /// Persists a new seller.
    ///
    /// Fails with [`StoreError::DuplicateSellerNumber`](crate::StoreError)
    /// when the `(event, seller_number)` pair is already taken; the unique
    /// constraint is the final arbiter under concurrent registration.
    async fn insert_seller(&self, seller: SellerRecord) -> Result<()>;

    /// Retrieves a seller, or `None` if it does not exist.
    async fn seller(&self, id: SellerId) -> Result<Option<SellerRecord>>;

    /// Returns the highest seller number assigned in an event so far.
    async fn max_seller_number(&self, event_id: EventId) -> Result<Option<u32>>;

    // --- articles ---

    /// Persists a new article.
    ///
    /// Fails with [`StoreError::DuplicateLabelNumber`](crate::StoreError)
    /// when the `(seller, label_number)` pair is already taken.
    async fn insert_article(&self, article: ArticleRecord) -> Result<()>;

    /// Overwrites an existing article's mutable fields (name, size, price).
    /// Returns false if the article does not exist.
    async fn update_article(&self, article: &ArticleRecord) -> Result<bool>;

    /// Deletes an article. Returns false if the article does not exist.
    async fn delete_article(&self, id: ArticleId) -> Result<bool>;

    /// Retrieves an article by id, or `None` if it does not exist.
    async fn article(&self, id: ArticleId) -> Result<Option<ArticleRecord>>;

    /// Resolves a manually typed tag — `(seller number, label number)` scoped
    /// by event — to the article it identifies.
    async fn article_by_label(
        &self,
        event_id: EventId,
        seller_number: u32,
        label_number: u32,
    ) -> Result<Option<ArticleRecord>>;

    /// Returns all articles of a seller, in label-number order.
    async fn articles_for_seller(&self, seller_id: SellerId) -> Result<Vec<ArticleRecord>>;

    /// Returns the number of articles a seller has submitted.
    async fn article_count_for_seller(&self, seller_id: SellerId) -> Result<u64>;

    /// Returns the highest label number assigned within a seller so far.
    async fn max_label_number(&self, seller_id: SellerId) -> Result<Option<u32>>;

    // --- checkouts ---

    /// Persists a new checkout session.
    async fn insert_checkout(&self, checkout: CheckoutRecord) -> Result<()>;

    /// Retrieves a checkout, or `None` if it does not exist.
    async fn checkout(&self, id: CheckoutId) -> Result<Option<CheckoutRecord>>;

    /// Marks a checkout completed, computing and storing the frozen
    /// `(count, total)` snapshot in the same atomic unit as the status flip,
    /// so the snapshot can never disagree with the claim set it froze.
    ///
    /// The update only applies if the stored version matches `expected`; a
    /// lost race surfaces as
    /// [`StoreError::VersionConflict`](crate::StoreError). A session with no
    /// claims refuses completion with
    /// [`StoreError::EmptySession`](crate::StoreError). Claims are kept for
    /// the audit trail.
    async fn complete_checkout(
        &self,
        id: CheckoutId,
        expected: Version,
        completed_at: DateTime<Utc>,
    ) -> Result<CheckoutSnapshot>;

    /// Marks a checkout cancelled and releases every claim it holds, in one
    /// atomic step, with the same version check as
    /// [`complete_checkout`](BazaarStore::complete_checkout). Returns the new
    /// version and the number of claims released.
    async fn cancel_checkout(&self, id: CheckoutId, expected: Version) -> Result<(Version, u64)>;

    // --- billings ---

    /// Persists a new billing session.
    async fn insert_billing(&self, billing: BillingRecord) -> Result<()>;

    /// Retrieves a billing, or `None` if it does not exist.
    async fn billing(&self, id: BillingId) -> Result<Option<BillingRecord>>;

    /// Marks a billing completed, computing and storing the frozen
    /// `(count, total, payout)` snapshot atomically with the status flip.
    /// The payout withholds `commission_percent` percent of the total,
    /// rounded half-up to whole cents; which percentage applies is the
    /// caller's policy. Version and empty-session semantics as for
    /// [`complete_checkout`](BazaarStore::complete_checkout). Billing claims
    /// are kept permanently: payout is claimed once.
    async fn complete_billing(
        &self,
        id: BillingId,
        expected: Version,
        commission_percent: u8,
        completed_at: DateTime<Utc>,
    ) -> Result<BillingSnapshot>;

    /// Marks a billing cancelled and releases its claims atomically.
    /// Returns the new version and the number of claims released.
    async fn cancel_billing(&self, id: BillingId, expected: Version) -> Result<(Version, u64)>;

    // --- claims ---

    /// Atomic check-and-set of the `(kind, article)` claim slot.
    ///
    /// If the slot is free it is taken for `session_id` and the call returns
    /// [`ClaimOutcome::Granted`]. If the same session already holds it, the
    /// call is an idempotent `Granted` and the stored position is unchanged.
    /// If a different session holds it, the call returns
    /// [`ClaimOutcome::Held`] naming the holder. Under concurrent calls for
    /// the same slot exactly one session wins; the operation either fully
    /// commits or fully fails.
    async fn try_claim(
        &self,
        kind: ClaimKind,
        article_id: ArticleId,
        session_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// Releases one claim, but only if `session_id` is the holder.
    /// Returns true if a claim was released.
    async fn release_claim(
        &self,
        kind: ClaimKind,
        article_id: ArticleId,
        session_id: Uuid,
    ) -> Result<bool>;

    /// Releases every claim of one kind held by a session.
    /// Returns the number released; never fails on an empty set.
    async fn release_claims_for_session(&self, kind: ClaimKind, session_id: Uuid) -> Result<u64>;

    /// Returns the claims held by a session, in claim (position) order.
    async fn claims_for_session(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
    ) -> Result<Vec<ClaimRecord>>;

    /// Returns the session currently holding the `(kind, article)` slot.
    async fn claim_holder(&self, kind: ClaimKind, article_id: ArticleId) -> Result<Option<Uuid>>;

    /// Returns the session's claimed articles with their current prices, read
    /// from one consistent snapshot, in claim order. A concurrent add or
    /// release moves the whole result before or after it — never through it.
    async fn claim_lines_for_session(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
    ) -> Result<Vec<ClaimLine>>;
}
