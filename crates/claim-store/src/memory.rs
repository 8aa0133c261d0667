use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use common::{ArticleId, BillingId, CheckoutId, EventId, Money, SellerId};

use crate::records::{
    ArticleRecord, BillingRecord, CheckoutRecord, ClaimKind, ClaimLine, ClaimRecord, EventRecord,
    SellerRecord, SessionStatus, Version,
};
use crate::store::{BazaarStore, BillingSnapshot, CheckoutSnapshot, ClaimOutcome};
use crate::{Result, StoreError};

/// In-memory store implementation.
///
/// Backs unit tests and embeddings that do not need durability, with the
/// same semantics as the PostgreSQL implementation. Every operation runs
/// under a single lock acquisition, which is what makes the claim
/// check-and-set and the session finalizers atomic here.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, EventRecord>,
    sellers: HashMap<SellerId, SellerRecord>,
    articles: HashMap<ArticleId, ArticleRecord>,
    checkouts: HashMap<CheckoutId, CheckoutRecord>,
    billings: HashMap<BillingId, BillingRecord>,
    claims: HashMap<(ClaimKind, ArticleId), ClaimRecord>,
    next_position: i64,
}

impl Inner {
    /// Sums the current prices of a session's claims; the caller holds the
    /// lock, which is what makes this a consistent snapshot.
    fn claim_totals(&self, kind: ClaimKind, session_id: Uuid) -> (u32, Money) {
        let lines: Vec<Money> = self
            .session_claims(kind, session_id)
            .iter()
            .filter_map(|c| self.articles.get(&c.article_id).map(|a| a.price))
            .collect();
        (lines.len() as u32, lines.into_iter().sum())
    }

    fn session_claims(&self, kind: ClaimKind, session_id: Uuid) -> Vec<ClaimRecord> {
        let mut claims: Vec<_> = self
            .claims
            .values()
            .filter(|c| c.kind == kind && c.session_id == session_id)
            .cloned()
            .collect();
        claims.sort_by_key(|c| c.position);
        claims
    }

    fn release_session_claims(&mut self, kind: ClaimKind, session_id: Uuid) -> u64 {
        let before = self.claims.len();
        self.claims
            .retain(|_, c| !(c.kind == kind && c.session_id == session_id));
        (before - self.claims.len()) as u64
    }
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of live claims, across both kinds.
    pub async fn claim_count(&self) -> usize {
        self.inner.read().await.claims.len()
    }

    /// Clears all stored state.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
    }
}

#[async_trait]
impl BazaarStore for MemoryStore {
    async fn insert_event(&self, event: EventRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.events.insert(event.id, event);
        Ok(())
    }

    async fn event(&self, id: EventId) -> Result<Option<EventRecord>> {
        Ok(self.inner.read().await.events.get(&id).cloned())
    }

    async fn insert_seller(&self, seller: SellerRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.sellers.values().any(|s| {
            s.event_id == seller.event_id && s.seller_number == seller.seller_number
        }) {
            return Err(StoreError::DuplicateSellerNumber {
                event_id: seller.event_id,
                seller_number: seller.seller_number,
            });
        }
        inner.sellers.insert(seller.id, seller);
        Ok(())
    }

    async fn seller(&self, id: SellerId) -> Result<Option<SellerRecord>> {
        Ok(self.inner.read().await.sellers.get(&id).cloned())
    }

    async fn max_seller_number(&self, event_id: EventId) -> Result<Option<u32>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sellers
            .values()
            .filter(|s| s.event_id == event_id)
            .map(|s| s.seller_number)
            .max())
    }

    async fn insert_article(&self, article: ArticleRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.articles.values().any(|a| {
            a.seller_id == article.seller_id && a.label_number == article.label_number
        }) {
            return Err(StoreError::DuplicateLabelNumber {
                seller_id: article.seller_id,
                label_number: article.label_number,
            });
        }
        inner.articles.insert(article.id, article);
        Ok(())
    }

    async fn update_article(&self, article: &ArticleRecord) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.articles.get_mut(&article.id) {
            Some(existing) => {
                existing.name = article.name.clone();
                existing.size = article.size.clone();
                existing.price = article.price;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_article(&self, id: ArticleId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.articles.remove(&id).is_some())
    }

    async fn article(&self, id: ArticleId) -> Result<Option<ArticleRecord>> {
        Ok(self.inner.read().await.articles.get(&id).cloned())
    }

    async fn article_by_label(
        &self,
        event_id: EventId,
        seller_number: u32,
        label_number: u32,
    ) -> Result<Option<ArticleRecord>> {
        let inner = self.inner.read().await;
        let seller = inner
            .sellers
            .values()
            .find(|s| s.event_id == event_id && s.seller_number == seller_number);
        let Some(seller) = seller else {
            return Ok(None);
        };
        Ok(inner
            .articles
            .values()
            .find(|a| a.seller_id == seller.id && a.label_number == label_number)
            .cloned())
    }

    async fn articles_for_seller(&self, seller_id: SellerId) -> Result<Vec<ArticleRecord>> {
        let inner = self.inner.read().await;
        let mut articles: Vec<_> = inner
            .articles
            .values()
            .filter(|a| a.seller_id == seller_id)
            .cloned()
            .collect();
        articles.sort_by_key(|a| a.label_number);
        Ok(articles)
    }

    async fn article_count_for_seller(&self, seller_id: SellerId) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .articles
            .values()
            .filter(|a| a.seller_id == seller_id)
            .count() as u64)
    }

    async fn max_label_number(&self, seller_id: SellerId) -> Result<Option<u32>> {
        let inner = self.inner.read().await;
        Ok(inner
            .articles
            .values()
            .filter(|a| a.seller_id == seller_id)
            .map(|a| a.label_number)
            .max())
    }

    async fn insert_checkout(&self, checkout: CheckoutRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.checkouts.insert(checkout.id, checkout);
        Ok(())
    }

    async fn checkout(&self, id: CheckoutId) -> Result<Option<CheckoutRecord>> {
        Ok(self.inner.read().await.checkouts.get(&id).cloned())
    }

    async fn complete_checkout(
        &self,
        id: CheckoutId,
        expected: Version,
        completed_at: DateTime<Utc>,
    ) -> Result<CheckoutSnapshot> {
        let mut inner = self.inner.write().await;
        let current = inner
            .checkouts
            .get(&id)
            .ok_or(StoreError::SessionNotFound(id.as_uuid()))?
            .version;
        if current != expected {
            return Err(StoreError::VersionConflict {
                session_id: id.as_uuid(),
                expected,
                actual: current,
            });
        }

        let (article_count, total) = inner.claim_totals(ClaimKind::Checkout, id.as_uuid());
        if article_count == 0 {
            return Err(StoreError::EmptySession(id.as_uuid()));
        }

        let checkout = inner
            .checkouts
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id.as_uuid()))?;
        checkout.status = SessionStatus::Completed;
        checkout.version = expected.next();
        checkout.article_count = Some(article_count);
        checkout.total = Some(total);
        checkout.completed_at = Some(completed_at);
        Ok(CheckoutSnapshot {
            version: checkout.version,
            article_count,
            total,
        })
    }

    async fn cancel_checkout(&self, id: CheckoutId, expected: Version) -> Result<(Version, u64)> {
        let mut inner = self.inner.write().await;
        let checkout = inner
            .checkouts
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id.as_uuid()))?;
        if checkout.version != expected {
            return Err(StoreError::VersionConflict {
                session_id: id.as_uuid(),
                expected,
                actual: checkout.version,
            });
        }
        checkout.status = SessionStatus::Cancelled;
        checkout.version = expected.next();
        let version = checkout.version;
        let released = inner.release_session_claims(ClaimKind::Checkout, id.as_uuid());
        Ok((version, released))
    }

    async fn insert_billing(&self, billing: BillingRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.billings.insert(billing.id, billing);
        Ok(())
    }

    async fn billing(&self, id: BillingId) -> Result<Option<BillingRecord>> {
        Ok(self.inner.read().await.billings.get(&id).cloned())
    }

    async fn complete_billing(
        &self,
        id: BillingId,
        expected: Version,
        commission_percent: u8,
        completed_at: DateTime<Utc>,
    ) -> Result<BillingSnapshot> {
        let mut inner = self.inner.write().await;
        let current = inner
            .billings
            .get(&id)
            .ok_or(StoreError::SessionNotFound(id.as_uuid()))?
            .version;
        if current != expected {
            return Err(StoreError::VersionConflict {
                session_id: id.as_uuid(),
                expected,
                actual: current,
            });
        }

        let (article_count, total) = inner.claim_totals(ClaimKind::Billing, id.as_uuid());
        if article_count == 0 {
            return Err(StoreError::EmptySession(id.as_uuid()));
        }
        let payout = total - total.percent(commission_percent);

        let billing = inner
            .billings
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id.as_uuid()))?;
        billing.status = SessionStatus::Completed;
        billing.version = expected.next();
        billing.article_count = Some(article_count);
        billing.total = Some(total);
        billing.payout = Some(payout);
        billing.completed_at = Some(completed_at);
        Ok(BillingSnapshot {
            version: billing.version,
            article_count,
            total,
            payout,
        })
    }

    async fn cancel_billing(&self, id: BillingId, expected: Version) -> Result<(Version, u64)> {
        let mut inner = self.inner.write().await;
        let billing = inner
            .billings
            .get_mut(&id)
            .ok_or(StoreError::SessionNotFound(id.as_uuid()))?;
        if billing.version != expected {
            return Err(StoreError::VersionConflict {
                session_id: id.as_uuid(),
                expected,
                actual: billing.version,
            });
        }
        billing.status = SessionStatus::Cancelled;
        billing.version = expected.next();
        let version = billing.version;
        let released = inner.release_session_claims(ClaimKind::Billing, id.as_uuid());
        Ok((version, released))
    }

    async fn try_claim(
        &self,
        kind: ClaimKind,
        article_id: ArticleId,
        session_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.claims.get(&(kind, article_id)) {
            if existing.session_id == session_id {
                return Ok(ClaimOutcome::Granted);
            }
            return Ok(ClaimOutcome::Held {
                holder: existing.session_id,
            });
        }
        inner.next_position += 1;
        let position = inner.next_position;
        inner.claims.insert(
            (kind, article_id),
            ClaimRecord {
                kind,
                article_id,
                session_id,
                position,
                claimed_at,
            },
        );
        Ok(ClaimOutcome::Granted)
    }

    async fn release_claim(
        &self,
        kind: ClaimKind,
        article_id: ArticleId,
        session_id: Uuid,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.claims.get(&(kind, article_id)) {
            Some(existing) if existing.session_id == session_id => {
                inner.claims.remove(&(kind, article_id));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claims_for_session(&self, kind: ClaimKind, session_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.write().await;
        Ok(inner.release_session_claims(kind, session_id))
    }

    async fn claims_for_session(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
    ) -> Result<Vec<ClaimRecord>> {
        Ok(self.inner.read().await.session_claims(kind, session_id))
    }

    async fn claim_holder(&self, kind: ClaimKind, article_id: ArticleId) -> Result<Option<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner.claims.get(&(kind, article_id)).map(|c| c.session_id))
    }

    async fn claim_lines_for_session(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
    ) -> Result<Vec<ClaimLine>> {
        let inner = self.inner.read().await;
        Ok(inner
            .session_claims(kind, session_id)
            .into_iter()
            .filter_map(|c| {
                inner.articles.get(&c.article_id).map(|a| ClaimLine {
                    article_id: c.article_id,
                    price: a.price,
                })
            })
            .collect())
    }
}
