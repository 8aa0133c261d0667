//! Exclusive claim ledger.
//!
//! One generic primitive backs both session kinds: a `(kind, article)` slot
//! can be held by at most one session at a time. Checkout and billing are two
//! independent axes of the same article, so a checkout claim never blocks a
//! billing claim and vice versa.
//!
//! The ledger is deliberately key-agnostic: callers resolve whatever key they
//! have (scanned id, typed seller/label numbers) to an [`ArticleId`] first,
//! and sessions enter as bare UUIDs. Exclusivity itself is delegated to the
//! store's atomic check-and-set, so it holds across process instances.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use claim_store::{BazaarStore, ClaimKind, ClaimOutcome, StoreError};
use common::ArticleId;

/// Errors that can occur during claim operations.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The article to claim does not exist.
    #[error("article not found: {0}")]
    ArticleNotFound(ArticleId),

    /// Another session holds the claim. Expected contention, not a fault.
    #[error("article {article_id} is already claimed by session {holder}")]
    AlreadyClaimed { article_id: ArticleId, holder: Uuid },

    /// A release was attempted by a session that is not the holder.
    #[error("article {article_id} is not claimed by session {session_id}")]
    NotClaimedBySession {
        article_id: ArticleId,
        session_id: Uuid,
    },

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The exclusive-claim primitive shared by checkout and billing sessions.
pub struct ClaimLedger<S> {
    store: S,
}

impl<S: BazaarStore> ClaimLedger<S> {
    /// Creates a new ledger over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Claims an article for a session.
    ///
    /// Exactly one of multiple concurrent claims for the same
    /// `(kind, article)` succeeds; the others observe
    /// [`ClaimError::AlreadyClaimed`] naming the winner. Re-claiming by the
    /// current holder is idempotent success, so a double-scanned tag is a
    /// no-op rather than an error.
    #[tracing::instrument(skip(self, at))]
    pub async fn try_claim(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
        article_id: ArticleId,
        at: DateTime<Utc>,
    ) -> Result<(), ClaimError> {
        if self.store.article(article_id).await?.is_none() {
            return Err(ClaimError::ArticleNotFound(article_id));
        }

        match self
            .store
            .try_claim(kind, article_id, session_id, at)
            .await?
        {
            ClaimOutcome::Granted => {
                metrics::counter!("claims_granted_total").increment(1);
                Ok(())
            }
            ClaimOutcome::Held { holder } => {
                metrics::counter!("claims_contested_total").increment(1);
                tracing::debug!(%article_id, %holder, "claim contested");
                Err(ClaimError::AlreadyClaimed { article_id, holder })
            }
        }
    }

    /// Releases one claim; only the holder may release.
    #[tracing::instrument(skip(self))]
    pub async fn release(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
        article_id: ArticleId,
    ) -> Result<(), ClaimError> {
        if self
            .store
            .release_claim(kind, article_id, session_id)
            .await?
        {
            Ok(())
        } else {
            Err(ClaimError::NotClaimedBySession {
                article_id,
                session_id,
            })
        }
    }

    /// Releases every claim held by a session and returns the count.
    /// An empty claim set releases zero claims; this never fails.
    #[tracing::instrument(skip(self))]
    pub async fn release_all(&self, kind: ClaimKind, session_id: Uuid) -> Result<u64, ClaimError> {
        let released = self
            .store
            .release_claims_for_session(kind, session_id)
            .await?;
        Ok(released)
    }

    /// Lists the articles claimed by a session, in claim order.
    #[tracing::instrument(skip(self))]
    pub async fn claims(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
    ) -> Result<Vec<ArticleId>, ClaimError> {
        let claims = self.store.claims_for_session(kind, session_id).await?;
        Ok(claims.into_iter().map(|c| c.article_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim_store::{ArticleRecord, EventRecord, MemoryStore, SellerRecord, SellerRole};
    use common::{EventId, Money, SellerId, UserId};

    async fn seeded_ledger() -> (ClaimLedger<MemoryStore>, ArticleId) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let event = EventRecord {
            id: EventId::new(),
            name: "test".to_string(),
            starts_at: now,
            ends_at: now + chrono::Duration::days(1),
            registration_opens_at: now - chrono::Duration::days(10),
            registration_closes_at: now,
            article_edit_deadline: None,
            commission_percent: 0,
        };
        store.insert_event(event.clone()).await.unwrap();
        let seller = SellerRecord {
            id: SellerId::new(),
            event_id: event.id,
            user_id: UserId::new(),
            seller_number: 1,
            role: SellerRole::Standard,
            can_bill: false,
        };
        store.insert_seller(seller.clone()).await.unwrap();
        let article = ArticleRecord {
            id: ArticleId::new(),
            seller_id: seller.id,
            event_id: event.id,
            label_number: 1,
            name: "jacket".to_string(),
            size: Some("116".to_string()),
            price: Money::from_cents(350),
        };
        store.insert_article(article.clone()).await.unwrap();
        (ClaimLedger::new(store), article.id)
    }

    #[tokio::test]
    async fn claim_then_contest() {
        let (ledger, article) = seeded_ledger().await;
        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();

        ledger
            .try_claim(ClaimKind::Checkout, winner, article, Utc::now())
            .await
            .unwrap();

        let result = ledger
            .try_claim(ClaimKind::Checkout, loser, article, Utc::now())
            .await;
        assert!(matches!(
            result,
            Err(ClaimError::AlreadyClaimed { holder, .. }) if holder == winner
        ));
    }

    #[tokio::test]
    async fn double_scan_is_idempotent() {
        let (ledger, article) = seeded_ledger().await;
        let session = Uuid::new_v4();

        for _ in 0..2 {
            ledger
                .try_claim(ClaimKind::Checkout, session, article, Utc::now())
                .await
                .unwrap();
        }

        let claims = ledger.claims(ClaimKind::Checkout, session).await.unwrap();
        assert_eq!(claims, vec![article]);
    }

    #[tokio::test]
    async fn unknown_article_is_rejected_before_claiming() {
        let (ledger, _) = seeded_ledger().await;
        let result = ledger
            .try_claim(
                ClaimKind::Checkout,
                Uuid::new_v4(),
                ArticleId::new(),
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(ClaimError::ArticleNotFound(_))));
    }

    #[tokio::test]
    async fn release_requires_holding() {
        let (ledger, article) = seeded_ledger().await;
        let holder = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        ledger
            .try_claim(ClaimKind::Checkout, holder, article, Utc::now())
            .await
            .unwrap();

        let result = ledger
            .release(ClaimKind::Checkout, stranger, article)
            .await;
        assert!(matches!(result, Err(ClaimError::NotClaimedBySession { .. })));

        ledger
            .release(ClaimKind::Checkout, holder, article)
            .await
            .unwrap();

        // Released means claimable again, by anyone.
        ledger
            .try_claim(ClaimKind::Checkout, stranger, article, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_all_returns_count_and_never_fails() {
        let (ledger, article) = seeded_ledger().await;
        let session = Uuid::new_v4();

        assert_eq!(
            ledger.release_all(ClaimKind::Checkout, session).await.unwrap(),
            0
        );

        ledger
            .try_claim(ClaimKind::Checkout, session, article, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            ledger.release_all(ClaimKind::Checkout, session).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn kinds_do_not_interfere() {
        let (ledger, article) = seeded_ledger().await;
        let checkout = Uuid::new_v4();
        let billing = Uuid::new_v4();

        ledger
            .try_claim(ClaimKind::Checkout, checkout, article, Utc::now())
            .await
            .unwrap();
        ledger
            .try_claim(ClaimKind::Billing, billing, article, Utc::now())
            .await
            .unwrap();

        assert_eq!(
            ledger.claims(ClaimKind::Checkout, checkout).await.unwrap(),
            vec![article]
        );
        assert_eq!(
            ledger.claims(ClaimKind::Billing, billing).await.unwrap(),
            vec![article]
        );
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (ledger, article) = seeded_ledger().await;
        let ledger = std::sync::Arc::new(ledger);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .try_claim(ClaimKind::Checkout, Uuid::new_v4(), article, Utc::now())
                    .await
            }));
        }

        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                won += 1;
            }
        }
        assert_eq!(won, 1);
    }
}
