//! Buyer-facing checkout sessions.
//!
//! A checkout claims articles through the [`ClaimLedger`] as they are
//! scanned or typed in, shows a live running total, and is finalized exactly
//! once: completing freezes the claim set and snapshots the total,
//! cancelling releases every claim. Claims are global-exclusive among
//! checkouts of the event, so two terminals can never sell the same article.

use thiserror::Error;

use claim_store::{
    BazaarStore, CheckoutRecord, ClaimKind, SessionStatus, StoreError,
};
use common::{ArticleId, CheckoutId, EventId, Money, UserId};

use crate::clock::{Clock, SystemClock};
use crate::ledger::{ClaimError, ClaimLedger};

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Checkout does not exist.
    #[error("checkout not found: {0}")]
    NotFound(CheckoutId),

    /// The owning event does not exist.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// The checkout is completed or cancelled; no further changes allowed.
    #[error("checkout {checkout_id} is {status}, no further changes allowed")]
    Finalized {
        checkout_id: CheckoutId,
        status: SessionStatus,
    },

    /// The article does not exist in the checkout's event.
    #[error("article not found: {0}")]
    ArticleNotFound(ArticleId),

    /// No article matches the typed tag numbers within the event.
    #[error("no article with tag {seller_number}/{label_number} in this event")]
    LabelNotFound {
        seller_number: u32,
        label_number: u32,
    },

    /// Another checkout already holds the article. Expected contention.
    #[error("article {article_id} is already booked by checkout {holder}")]
    AlreadyBooked {
        article_id: ArticleId,
        holder: CheckoutId,
    },

    /// The article is not part of this checkout.
    #[error("article {0} is not in this checkout")]
    NotClaimed(ArticleId),

    /// Completion attempted with zero claimed articles.
    #[error("cannot complete a checkout with no articles")]
    Empty,

    /// A concurrent finalizer won the race; refresh and retry if sensible.
    #[error("checkout {0} was modified concurrently")]
    Conflict(CheckoutId),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Running or frozen `(count, total)` of a checkout; what a register
/// display polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckoutTotal {
    pub article_count: u32,
    pub total: Money,
}

/// Manages buyer-facing checkout sessions.
pub struct CheckoutManager<S, C = SystemClock> {
    store: S,
    ledger: ClaimLedger<S>,
    clock: C,
}

impl<S: BazaarStore + Clone> CheckoutManager<S, SystemClock> {
    /// Creates a new manager over the given store, using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: BazaarStore + Clone, C: Clock> CheckoutManager<S, C> {
    /// Creates a new manager with an explicit clock.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            ledger: ClaimLedger::new(store.clone()),
            store,
            clock,
        }
    }

    /// Opens a new checkout session for an event.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        event_id: EventId,
        operator: UserId,
    ) -> Result<CheckoutRecord, CheckoutError> {
        if self.store.event(event_id).await?.is_none() {
            return Err(CheckoutError::EventNotFound(event_id));
        }

        let record = CheckoutRecord::new(CheckoutId::new(), event_id, operator, self.clock.now());
        self.store.insert_checkout(record.clone()).await?;

        tracing::info!(checkout_id = %record.id, "opened checkout");
        Ok(record)
    }

    /// Looks up a checkout by id.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, id: CheckoutId) -> Result<CheckoutRecord, CheckoutError> {
        self.store
            .checkout(id)
            .await?
            .ok_or(CheckoutError::NotFound(id))
    }

    /// Claims an article for the checkout by its scanned internal id.
    ///
    /// Re-adding an article this checkout already holds is an idempotent
    /// no-op (double scans happen at real registers).
    #[tracing::instrument(skip(self))]
    pub async fn add_article(
        &self,
        checkout_id: CheckoutId,
        article_id: ArticleId,
    ) -> Result<(), CheckoutError> {
        let checkout = self.open_checkout(checkout_id).await?;

        // An id from another event resolves to nothing here.
        let article = self
            .store
            .article(article_id)
            .await?
            .ok_or(CheckoutError::ArticleNotFound(article_id))?;
        if article.event_id != checkout.event_id {
            return Err(CheckoutError::ArticleNotFound(article_id));
        }

        self.claim(&checkout, article_id).await
    }

    /// Claims an article resolved from its typed tag numbers, scoped to the
    /// checkout's event. Both paths converge on the same claim slot.
    #[tracing::instrument(skip(self))]
    pub async fn add_article_by_label(
        &self,
        checkout_id: CheckoutId,
        seller_number: u32,
        label_number: u32,
    ) -> Result<ArticleId, CheckoutError> {
        let checkout = self.open_checkout(checkout_id).await?;

        let article = self
            .store
            .article_by_label(checkout.event_id, seller_number, label_number)
            .await?
            .ok_or(CheckoutError::LabelNotFound {
                seller_number,
                label_number,
            })?;

        self.claim(&checkout, article.id).await?;
        Ok(article.id)
    }

    /// Releases one article from the checkout.
    #[tracing::instrument(skip(self))]
    pub async fn remove_article(
        &self,
        checkout_id: CheckoutId,
        article_id: ArticleId,
    ) -> Result<(), CheckoutError> {
        self.open_checkout(checkout_id).await?;

        self.ledger
            .release(ClaimKind::Checkout, checkout_id.as_uuid(), article_id)
            .await
            .map_err(|e| match e {
                ClaimError::NotClaimedBySession { article_id, .. } => {
                    CheckoutError::NotClaimed(article_id)
                }
                e => claim_to_checkout_error(e),
            })
    }

    /// Lists the checkout's claimed articles in scan order.
    #[tracing::instrument(skip(self))]
    pub async fn list_articles(
        &self,
        checkout_id: CheckoutId,
    ) -> Result<Vec<ArticleId>, CheckoutError> {
        self.checkout(checkout_id).await?;
        self.ledger
            .claims(ClaimKind::Checkout, checkout_id.as_uuid())
            .await
            .map_err(claim_to_checkout_error)
    }

    /// Computes the checkout's `(count, total)`.
    ///
    /// While in progress this is a live running total over current prices,
    /// read from one consistent snapshot of the claim set, so a register
    /// display polling it may be momentarily stale but never torn. For a
    /// completed checkout the frozen completion snapshot is returned.
    #[tracing::instrument(skip(self))]
    pub async fn compute_total(
        &self,
        checkout_id: CheckoutId,
    ) -> Result<CheckoutTotal, CheckoutError> {
        let checkout = self.checkout(checkout_id).await?;

        if let (Some(article_count), Some(total)) = (checkout.article_count, checkout.total) {
            return Ok(CheckoutTotal {
                article_count,
                total,
            });
        }

        let lines = self
            .store
            .claim_lines_for_session(ClaimKind::Checkout, checkout_id.as_uuid())
            .await?;
        Ok(CheckoutTotal {
            article_count: lines.len() as u32,
            total: lines.iter().map(|l| l.price).sum(),
        })
    }

    /// Completes the checkout, freezing its claim set and total.
    ///
    /// The store computes the snapshot atomically with the status flip, so
    /// the frozen total always matches the frozen claim set. Fails with
    /// [`CheckoutError::Empty`] when nothing is claimed. The version check
    /// on the session row makes complete and cancel mutually exclusive: a
    /// concurrent loser observes [`CheckoutError::Conflict`], never a silent
    /// overwrite.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, checkout_id: CheckoutId) -> Result<CheckoutRecord, CheckoutError> {
        let checkout = self.open_checkout(checkout_id).await?;

        let completed_at = self.clock.now();
        let snapshot = self
            .store
            .complete_checkout(checkout_id, checkout.version, completed_at)
            .await
            .map_err(|e| match e {
                StoreError::EmptySession(_) => CheckoutError::Empty,
                e => finalizer_error(checkout_id, e),
            })?;

        metrics::counter!("checkouts_completed_total").increment(1);
        tracing::info!(
            %checkout_id,
            total = %snapshot.total,
            article_count = snapshot.article_count,
            "completed checkout"
        );

        Ok(CheckoutRecord {
            status: SessionStatus::Completed,
            version: snapshot.version,
            completed_at: Some(completed_at),
            article_count: Some(snapshot.article_count),
            total: Some(snapshot.total),
            ..checkout
        })
    }

    /// Cancels the checkout, releasing every claim so the articles become
    /// available to other checkouts again. Returns the number of claims
    /// released.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, checkout_id: CheckoutId) -> Result<u64, CheckoutError> {
        let checkout = self.open_checkout(checkout_id).await?;

        let (_, released) = self
            .store
            .cancel_checkout(checkout_id, checkout.version)
            .await
            .map_err(|e| finalizer_error(checkout_id, e))?;

        metrics::counter!("checkouts_cancelled_total").increment(1);
        tracing::info!(%checkout_id, released, "cancelled checkout");
        Ok(released)
    }

    async fn open_checkout(&self, id: CheckoutId) -> Result<CheckoutRecord, CheckoutError> {
        let checkout = self.checkout(id).await?;
        if checkout.status.is_terminal() {
            return Err(CheckoutError::Finalized {
                checkout_id: id,
                status: checkout.status,
            });
        }
        Ok(checkout)
    }

    async fn claim(
        &self,
        checkout: &CheckoutRecord,
        article_id: ArticleId,
    ) -> Result<(), CheckoutError> {
        self.ledger
            .try_claim(
                ClaimKind::Checkout,
                checkout.id.as_uuid(),
                article_id,
                self.clock.now(),
            )
            .await
            .map_err(claim_to_checkout_error)
    }
}

fn claim_to_checkout_error(e: ClaimError) -> CheckoutError {
    match e {
        ClaimError::ArticleNotFound(id) => CheckoutError::ArticleNotFound(id),
        ClaimError::AlreadyClaimed { article_id, holder } => CheckoutError::AlreadyBooked {
            article_id,
            holder: CheckoutId::from_uuid(holder),
        },
        ClaimError::NotClaimedBySession { article_id, .. } => {
            CheckoutError::NotClaimed(article_id)
        }
        ClaimError::Store(e) => CheckoutError::Store(e),
    }
}

fn finalizer_error(checkout_id: CheckoutId, e: StoreError) -> CheckoutError {
    match e {
        StoreError::VersionConflict { .. } => CheckoutError::Conflict(checkout_id),
        StoreError::SessionNotFound(_) => CheckoutError::NotFound(checkout_id),
        e => CheckoutError::Store(e),
    }
}
