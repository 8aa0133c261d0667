//! Seller-facing billing sessions.
//!
//! A billing session reconciles one seller's sold articles into a payout.
//! Claim mechanics mirror checkouts but run on the independent billing axis,
//! and claims are scoped to the owning seller's articles. A completed
//! billing keeps its claims forever: payout for an article is granted once.
//! Whether an article must have been sold first is the caller's policy; the
//! engine enforces the seller's billing permission and claim exclusivity.

use thiserror::Error;

use claim_store::{BazaarStore, BillingRecord, ClaimKind, SessionStatus, StoreError};
use common::{ArticleId, BillingId, EventId, Money, SellerId, UserId};

use crate::clock::{Clock, SystemClock};
use crate::ledger::{ClaimError, ClaimLedger};

/// Errors that can occur during billing operations.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Billing session does not exist.
    #[error("billing not found: {0}")]
    NotFound(BillingId),

    /// The owning event does not exist.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// The seller does not exist within the event.
    #[error("seller not found in event: {0}")]
    SellerNotFound(SellerId),

    /// The seller's billing permission flag is not set.
    #[error("seller {0} is not permitted to bill")]
    BillingNotPermitted(SellerId),

    /// The billing is completed or cancelled; no further changes allowed.
    #[error("billing {billing_id} is {status}, no further changes allowed")]
    Finalized {
        billing_id: BillingId,
        status: SessionStatus,
    },

    /// The article does not exist in the billing's event.
    #[error("article not found: {0}")]
    ArticleNotFound(ArticleId),

    /// No article matches the typed tag numbers within the event.
    #[error("no article with tag {seller_number}/{label_number} in this event")]
    LabelNotFound {
        seller_number: u32,
        label_number: u32,
    },

    /// The article belongs to a different seller than the billing's.
    #[error("article {article_id} belongs to a different seller")]
    ForbiddenSeller { article_id: ArticleId },

    /// Another billing already claimed the article's payout.
    /// Expected contention.
    #[error("article {article_id} is already billed by session {holder}")]
    AlreadyBilled {
        article_id: ArticleId,
        holder: BillingId,
    },

    /// The article is not part of this billing.
    #[error("article {0} is not in this billing")]
    NotClaimed(ArticleId),

    /// Completion attempted with zero claimed articles.
    #[error("cannot complete a billing with no articles")]
    Empty,

    /// A concurrent finalizer won the race; refresh and retry if sensible.
    #[error("billing {0} was modified concurrently")]
    Conflict(BillingId),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Settlement preview of an open billing, or the frozen result of a
/// completed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BillingSettlement {
    pub article_count: u32,
    /// Sum of the claimed articles' prices at completion time.
    pub total: Money,
    /// `total` minus the event's commission, rounded to whole cents.
    pub payout: Money,
}

/// Manages seller-facing billing sessions.
pub struct BillingManager<S, C = SystemClock> {
    store: S,
    ledger: ClaimLedger<S>,
    clock: C,
}

impl<S: BazaarStore + Clone> BillingManager<S, SystemClock> {
    /// Creates a new manager over the given store, using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: BazaarStore + Clone, C: Clock> BillingManager<S, C> {
    /// Creates a new manager with an explicit clock.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            ledger: ClaimLedger::new(store.clone()),
            store,
            clock,
        }
    }

    /// Opens a new billing session for one seller of an event.
    ///
    /// The seller must belong to the event and carry the billing permission
    /// flag.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        event_id: EventId,
        seller_id: SellerId,
        operator: UserId,
    ) -> Result<BillingRecord, BillingError> {
        if self.store.event(event_id).await?.is_none() {
            return Err(BillingError::EventNotFound(event_id));
        }
        let seller = self
            .store
            .seller(seller_id)
            .await?
            .filter(|s| s.event_id == event_id)
            .ok_or(BillingError::SellerNotFound(seller_id))?;
        if !seller.can_bill {
            return Err(BillingError::BillingNotPermitted(seller_id));
        }

        let record = BillingRecord::new(
            BillingId::new(),
            event_id,
            seller_id,
            operator,
            self.clock.now(),
        );
        self.store.insert_billing(record.clone()).await?;

        tracing::info!(billing_id = %record.id, %seller_id, "opened billing");
        Ok(record)
    }

    /// Looks up a billing by id.
    #[tracing::instrument(skip(self))]
    pub async fn billing(&self, id: BillingId) -> Result<BillingRecord, BillingError> {
        self.store
            .billing(id)
            .await?
            .ok_or(BillingError::NotFound(id))
    }

    /// Claims an article's payout for the billing, by internal id.
    ///
    /// The article must belong to the billing's seller; the claim runs on
    /// the billing axis, independent of any checkout claim on the same
    /// article. Re-adding an article this billing already holds is an
    /// idempotent no-op.
    #[tracing::instrument(skip(self))]
    pub async fn add_article(
        &self,
        billing_id: BillingId,
        article_id: ArticleId,
    ) -> Result<(), BillingError> {
        let billing = self.open_billing(billing_id).await?;

        let article = self
            .store
            .article(article_id)
            .await?
            .ok_or(BillingError::ArticleNotFound(article_id))?;
        if article.event_id != billing.event_id {
            return Err(BillingError::ArticleNotFound(article_id));
        }
        if article.seller_id != billing.seller_id {
            return Err(BillingError::ForbiddenSeller { article_id });
        }

        self.claim(&billing, article_id).await
    }

    /// Claims an article resolved from its typed tag numbers.
    #[tracing::instrument(skip(self))]
    pub async fn add_article_by_label(
        &self,
        billing_id: BillingId,
        seller_number: u32,
        label_number: u32,
    ) -> Result<ArticleId, BillingError> {
        let billing = self.open_billing(billing_id).await?;

        let article = self
            .store
            .article_by_label(billing.event_id, seller_number, label_number)
            .await?
            .ok_or(BillingError::LabelNotFound {
                seller_number,
                label_number,
            })?;
        if article.seller_id != billing.seller_id {
            return Err(BillingError::ForbiddenSeller {
                article_id: article.id,
            });
        }

        self.claim(&billing, article.id).await?;
        Ok(article.id)
    }

    /// Releases one article from the billing.
    #[tracing::instrument(skip(self))]
    pub async fn remove_article(
        &self,
        billing_id: BillingId,
        article_id: ArticleId,
    ) -> Result<(), BillingError> {
        self.open_billing(billing_id).await?;

        self.ledger
            .release(ClaimKind::Billing, billing_id.as_uuid(), article_id)
            .await
            .map_err(|e| match e {
                ClaimError::NotClaimedBySession { article_id, .. } => {
                    BillingError::NotClaimed(article_id)
                }
                e => claim_to_billing_error(e),
            })
    }

    /// Lists the billing's claimed articles in claim order.
    #[tracing::instrument(skip(self))]
    pub async fn list_articles(
        &self,
        billing_id: BillingId,
    ) -> Result<Vec<ArticleId>, BillingError> {
        self.billing(billing_id).await?;
        self.ledger
            .claims(ClaimKind::Billing, billing_id.as_uuid())
            .await
            .map_err(claim_to_billing_error)
    }

    /// Computes the billing's settlement.
    ///
    /// While in progress: a live preview over current prices and the
    /// event's commission, from one consistent claim snapshot. Once
    /// completed: the frozen settlement, immune to any later price edits.
    #[tracing::instrument(skip(self))]
    pub async fn compute_settlement(
        &self,
        billing_id: BillingId,
    ) -> Result<BillingSettlement, BillingError> {
        let billing = self.billing(billing_id).await?;

        if let (Some(article_count), Some(total), Some(payout)) =
            (billing.article_count, billing.total, billing.payout)
        {
            return Ok(BillingSettlement {
                article_count,
                total,
                payout,
            });
        }

        let event = self
            .store
            .event(billing.event_id)
            .await?
            .ok_or(BillingError::EventNotFound(billing.event_id))?;
        let lines = self
            .store
            .claim_lines_for_session(ClaimKind::Billing, billing_id.as_uuid())
            .await?;
        let total: Money = lines.iter().map(|l| l.price).sum();
        Ok(BillingSettlement {
            article_count: lines.len() as u32,
            total,
            payout: total - total.percent(event.commission_percent),
        })
    }

    /// Completes the billing, freezing its settlement.
    ///
    /// The payout is computed from a snapshot taken now — billing claims do
    /// not lock price edits, so recomputing later could drift. The store
    /// freezes the snapshot atomically with the status flip; the commission
    /// percentage comes from the owning event. The version check makes
    /// complete and cancel mutually exclusive.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, billing_id: BillingId) -> Result<BillingRecord, BillingError> {
        let billing = self.open_billing(billing_id).await?;

        let event = self
            .store
            .event(billing.event_id)
            .await?
            .ok_or(BillingError::EventNotFound(billing.event_id))?;

        let completed_at = self.clock.now();
        let snapshot = self
            .store
            .complete_billing(
                billing_id,
                billing.version,
                event.commission_percent,
                completed_at,
            )
            .await
            .map_err(|e| match e {
                StoreError::EmptySession(_) => BillingError::Empty,
                e => finalizer_error(billing_id, e),
            })?;

        metrics::counter!("billings_completed_total").increment(1);
        tracing::info!(
            %billing_id,
            total = %snapshot.total,
            payout = %snapshot.payout,
            "completed billing"
        );

        Ok(BillingRecord {
            status: SessionStatus::Completed,
            version: snapshot.version,
            completed_at: Some(completed_at),
            article_count: Some(snapshot.article_count),
            total: Some(snapshot.total),
            payout: Some(snapshot.payout),
            ..billing
        })
    }

    /// Cancels the billing, releasing its claims so the articles can be
    /// billed by a later session. Returns the number of claims released.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, billing_id: BillingId) -> Result<u64, BillingError> {
        let billing = self.open_billing(billing_id).await?;

        let (_, released) = self
            .store
            .cancel_billing(billing_id, billing.version)
            .await
            .map_err(|e| finalizer_error(billing_id, e))?;

        metrics::counter!("billings_cancelled_total").increment(1);
        tracing::info!(%billing_id, released, "cancelled billing");
        Ok(released)
    }

    async fn open_billing(&self, id: BillingId) -> Result<BillingRecord, BillingError> {
        let billing = self.billing(id).await?;
        if billing.status.is_terminal() {
            return Err(BillingError::Finalized {
                billing_id: id,
                status: billing.status,
            });
        }
        Ok(billing)
    }

    async fn claim(
        &self,
        billing: &BillingRecord,
        article_id: ArticleId,
    ) -> Result<(), BillingError> {
        self.ledger
            .try_claim(
                ClaimKind::Billing,
                billing.id.as_uuid(),
                article_id,
                self.clock.now(),
            )
            .await
            .map_err(claim_to_billing_error)
    }
}

fn claim_to_billing_error(e: ClaimError) -> BillingError {
    match e {
        ClaimError::ArticleNotFound(id) => BillingError::ArticleNotFound(id),
        ClaimError::AlreadyClaimed { article_id, holder } => BillingError::AlreadyBilled {
            article_id,
            holder: BillingId::from_uuid(holder),
        },
        ClaimError::NotClaimedBySession { article_id, .. } => BillingError::NotClaimed(article_id),
        ClaimError::Store(e) => BillingError::Store(e),
    }
}

fn finalizer_error(billing_id: BillingId, e: StoreError) -> BillingError {
    match e {
        StoreError::VersionConflict { .. } => BillingError::Conflict(billing_id),
        StoreError::SessionNotFound(_) => BillingError::NotFound(billing_id),
        e => BillingError::Store(e),
    }
}
