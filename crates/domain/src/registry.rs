//! Article registry.
//!
//! Owns the seller-facing article lifecycle: creation with price and quota
//! validation, edits while unlocked, and the two lookup paths (internal id,
//! typed seller/label numbers). Claim bookkeeping lives in the
//! [`ledger`](crate::ledger); the registry only consults claim state to
//! decide whether an article is locked against edits.

use thiserror::Error;

use claim_store::{ArticleRecord, BazaarStore, ClaimKind, StoreError};
use common::{ArticleId, EventId, Money, SellerId};

use crate::clock::{Clock, SystemClock};

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Article does not exist.
    #[error("article not found: {0}")]
    NotFound(ArticleId),

    /// No article matches the typed tag numbers within the event.
    #[error("no article with tag {seller_number}/{label_number} in event {event_id}")]
    LabelNotFound {
        event_id: EventId,
        seller_number: u32,
        label_number: u32,
    },

    /// The owning seller does not exist.
    #[error("seller not found: {0}")]
    SellerNotFound(SellerId),

    /// The owning event does not exist.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// Price is not a positive amount on the half-euro grid.
    #[error("invalid price {0}: must be positive and a multiple of 0.50 €")]
    InvalidPrice(Money),

    /// The seller's role quota is exhausted.
    #[error("seller {seller_id} has reached the quota of {quota} articles")]
    QuotaExceeded { seller_id: SellerId, quota: u32 },

    /// The article cannot be modified: it is claimed by an open checkout,
    /// it is claimed for billing, or the event's edit deadline has elapsed.
    #[error("article {0} is locked")]
    Locked(ArticleId),

    /// Two submissions raced for the same label number; this one lost.
    #[error("label number {label_number} is already taken for seller {seller_id}")]
    DuplicateLabelNumber {
        seller_id: SellerId,
        label_number: u32,
    },

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Manages seller articles.
pub struct ArticleRegistry<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S: BazaarStore> ArticleRegistry<S, SystemClock> {
    /// Creates a new registry over the given store, using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: BazaarStore, C: Clock> ArticleRegistry<S, C> {
    /// Creates a new registry with an explicit clock.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Submits a new article for a seller.
    ///
    /// The price must be positive and on the half-euro grid. The label
    /// number is allocated as the next free number within the seller;
    /// concurrent submissions may race for it, and the loser surfaces
    /// [`RegistryError::DuplicateLabelNumber`] without an internal retry.
    #[tracing::instrument(skip(self, name, size))]
    pub async fn create_article(
        &self,
        seller_id: SellerId,
        name: impl Into<String> + std::fmt::Debug,
        size: Option<String>,
        price: Money,
    ) -> Result<ArticleRecord, RegistryError> {
        if !price.is_positive() || !price.is_half_euro_step() {
            return Err(RegistryError::InvalidPrice(price));
        }

        let seller = self
            .store
            .seller(seller_id)
            .await?
            .ok_or(RegistryError::SellerNotFound(seller_id))?;

        let quota = seller.role.max_article_count();
        let count = self.store.article_count_for_seller(seller_id).await?;
        if count >= u64::from(quota) {
            return Err(RegistryError::QuotaExceeded { seller_id, quota });
        }

        let label_number = self
            .store
            .max_label_number(seller_id)
            .await?
            .map_or(1, |n| n + 1);

        let record = ArticleRecord {
            id: ArticleId::new(),
            seller_id,
            event_id: seller.event_id,
            label_number,
            name: name.into(),
            size,
            price,
        };
        self.store
            .insert_article(record.clone())
            .await
            .map_err(|e| match e {
                StoreError::DuplicateLabelNumber {
                    seller_id,
                    label_number,
                } => RegistryError::DuplicateLabelNumber {
                    seller_id,
                    label_number,
                },
                e => RegistryError::Store(e),
            })?;

        tracing::info!(article_id = %record.id, label_number, "created article");
        Ok(record)
    }

    /// Updates an article's name, size, and price.
    ///
    /// Fails with [`RegistryError::Locked`] while the article is claimed by
    /// an open checkout or once the event's edit deadline has elapsed. A
    /// claim held by a *completed* checkout does not lock edits: the sale is
    /// insulated by its own total snapshot.
    #[tracing::instrument(skip(self, name, size))]
    pub async fn update_article(
        &self,
        article_id: ArticleId,
        name: impl Into<String> + std::fmt::Debug,
        size: Option<String>,
        price: Money,
    ) -> Result<ArticleRecord, RegistryError> {
        if !price.is_positive() || !price.is_half_euro_step() {
            return Err(RegistryError::InvalidPrice(price));
        }

        let article = self
            .store
            .article(article_id)
            .await?
            .ok_or(RegistryError::NotFound(article_id))?;

        self.check_edit_deadline(&article).await?;
        if self.held_by_open_checkout(article_id).await? {
            return Err(RegistryError::Locked(article_id));
        }

        let updated = ArticleRecord {
            name: name.into(),
            size,
            price,
            ..article
        };
        if !self.store.update_article(&updated).await? {
            return Err(RegistryError::NotFound(article_id));
        }
        Ok(updated)
    }

    /// Deletes an article.
    ///
    /// Refused while any claim exists on either axis, and after the edit
    /// deadline.
    #[tracing::instrument(skip(self))]
    pub async fn delete_article(&self, article_id: ArticleId) -> Result<(), RegistryError> {
        let article = self
            .store
            .article(article_id)
            .await?
            .ok_or(RegistryError::NotFound(article_id))?;

        self.check_edit_deadline(&article).await?;
        for kind in [ClaimKind::Checkout, ClaimKind::Billing] {
            if self.store.claim_holder(kind, article_id).await?.is_some() {
                return Err(RegistryError::Locked(article_id));
            }
        }

        if !self.store.delete_article(article_id).await? {
            return Err(RegistryError::NotFound(article_id));
        }
        Ok(())
    }

    /// Looks up an article by its internal id.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_id(&self, article_id: ArticleId) -> Result<ArticleRecord, RegistryError> {
        self.store
            .article(article_id)
            .await?
            .ok_or(RegistryError::NotFound(article_id))
    }

    /// Resolves a manually typed tag — seller number and label number,
    /// scoped by event — to its article. The event scope keeps identical
    /// number pairs of different bazaars apart.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_label(
        &self,
        event_id: EventId,
        seller_number: u32,
        label_number: u32,
    ) -> Result<ArticleRecord, RegistryError> {
        self.store
            .article_by_label(event_id, seller_number, label_number)
            .await?
            .ok_or(RegistryError::LabelNotFound {
                event_id,
                seller_number,
                label_number,
            })
    }

    /// Lists a seller's articles in label-number order.
    #[tracing::instrument(skip(self))]
    pub async fn articles_for_seller(
        &self,
        seller_id: SellerId,
    ) -> Result<Vec<ArticleRecord>, RegistryError> {
        if self.store.seller(seller_id).await?.is_none() {
            return Err(RegistryError::SellerNotFound(seller_id));
        }
        Ok(self.store.articles_for_seller(seller_id).await?)
    }

    async fn check_edit_deadline(&self, article: &ArticleRecord) -> Result<(), RegistryError> {
        let event = self
            .store
            .event(article.event_id)
            .await?
            .ok_or(RegistryError::EventNotFound(article.event_id))?;
        if let Some(deadline) = event.article_edit_deadline
            && self.clock.now() > deadline
        {
            return Err(RegistryError::Locked(article.id));
        }
        Ok(())
    }

    async fn held_by_open_checkout(&self, article_id: ArticleId) -> Result<bool, RegistryError> {
        let Some(holder) = self
            .store
            .claim_holder(ClaimKind::Checkout, article_id)
            .await?
        else {
            return Ok(false);
        };
        let checkout = self
            .store
            .checkout(common::CheckoutId::from_uuid(holder))
            .await?;
        // A claim without a session row is treated as open: locking is the
        // safe reading of inconsistent state.
        Ok(checkout.is_none_or(|c| c.status.is_in_progress()))
    }
}
