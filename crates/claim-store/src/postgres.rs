use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{ArticleId, BillingId, CheckoutId, EventId, Money, SellerId, UserId};

use crate::config::StoreConfig;
use crate::records::{
    ArticleRecord, BillingRecord, CheckoutRecord, ClaimKind, ClaimLine, ClaimRecord, EventRecord,
    SellerRecord, SellerRole, SessionStatus, Version,
};
use crate::store::{BazaarStore, BillingSnapshot, CheckoutSnapshot, ClaimOutcome};
use crate::{Result, StoreError};

/// PostgreSQL-backed store implementation.
///
/// Uniqueness and claim exclusivity are enforced by the schema (unique
/// constraints and the `(kind, article_id)` primary key on `claims`), so the
/// guarantees hold across independent process instances sharing the database.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool from the given configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("bazaar store migrations applied");
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventRecord> {
        Ok(EventRecord {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            registration_opens_at: row.try_get("registration_opens_at")?,
            registration_closes_at: row.try_get("registration_closes_at")?,
            article_edit_deadline: row.try_get("article_edit_deadline")?,
            commission_percent: row.try_get::<i16, _>("commission_percent")? as u8,
        })
    }

    fn row_to_seller(row: PgRow) -> Result<SellerRecord> {
        let role: String = row.try_get("role")?;
        Ok(SellerRecord {
            id: SellerId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            seller_number: row.try_get::<i32, _>("seller_number")? as u32,
            role: SellerRole::from_str(&role)
                .ok_or_else(|| StoreError::InvalidColumn("seller role", role))?,
            can_bill: row.try_get("can_bill")?,
        })
    }

    fn row_to_article(row: PgRow) -> Result<ArticleRecord> {
        Ok(ArticleRecord {
            id: ArticleId::from_uuid(row.try_get::<Uuid, _>("id")?),
            seller_id: SellerId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            label_number: row.try_get::<i32, _>("label_number")? as u32,
            name: row.try_get("name")?,
            size: row.try_get("size")?,
            price: Money::from_cents(row.try_get::<i64, _>("price_cents")?),
        })
    }

    fn row_to_checkout(row: PgRow) -> Result<CheckoutRecord> {
        let status: String = row.try_get("status")?;
        Ok(CheckoutRecord {
            id: CheckoutId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            operator: UserId::from_uuid(row.try_get::<Uuid, _>("operator")?),
            created_at: row.try_get("created_at")?,
            status: SessionStatus::from_str(&status)
                .ok_or_else(|| StoreError::InvalidColumn("session status", status))?,
            version: Version::new(row.try_get("version")?),
            completed_at: row.try_get("completed_at")?,
            article_count: row
                .try_get::<Option<i32>, _>("article_count")?
                .map(|c| c as u32),
            total: row
                .try_get::<Option<i64>, _>("total_cents")?
                .map(Money::from_cents),
        })
    }

    fn row_to_billing(row: PgRow) -> Result<BillingRecord> {
        let status: String = row.try_get("status")?;
        Ok(BillingRecord {
            id: BillingId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            seller_id: SellerId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            operator: UserId::from_uuid(row.try_get::<Uuid, _>("operator")?),
            created_at: row.try_get("created_at")?,
            status: SessionStatus::from_str(&status)
                .ok_or_else(|| StoreError::InvalidColumn("session status", status))?,
            version: Version::new(row.try_get("version")?),
            completed_at: row.try_get("completed_at")?,
            article_count: row
                .try_get::<Option<i32>, _>("article_count")?
                .map(|c| c as u32),
            total: row
                .try_get::<Option<i64>, _>("total_cents")?
                .map(Money::from_cents),
            payout: row
                .try_get::<Option<i64>, _>("payout_cents")?
                .map(Money::from_cents),
        })
    }

    fn row_to_claim(row: PgRow) -> Result<ClaimRecord> {
        let kind: String = row.try_get("kind")?;
        Ok(ClaimRecord {
            kind: ClaimKind::from_str(&kind)
                .ok_or_else(|| StoreError::InvalidColumn("claim kind", kind))?,
            article_id: ArticleId::from_uuid(row.try_get::<Uuid, _>("article_id")?),
            session_id: row.try_get("session_id")?,
            position: row.try_get("position")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }

    /// Maps a version-check failure on a session row to the precise error:
    /// missing row or stale expected version.
    async fn finalizer_conflict(
        &self,
        table: &str,
        session_id: Uuid,
        expected: Version,
    ) -> StoreError {
        let query = format!("SELECT version FROM {table} WHERE id = $1");
        let actual: std::result::Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await;
        match actual {
            Ok(Some(actual)) => StoreError::VersionConflict {
                session_id,
                expected,
                actual: Version::new(actual),
            },
            Ok(None) => StoreError::SessionNotFound(session_id),
            Err(e) => StoreError::Database(e),
        }
    }

    /// Like [`finalizer_conflict`](Self::finalizer_conflict), but a matching
    /// version means the guarded completion found no claims to freeze.
    async fn completion_conflict(
        &self,
        table: &str,
        session_id: Uuid,
        expected: Version,
    ) -> StoreError {
        match self.finalizer_conflict(table, session_id, expected).await {
            StoreError::VersionConflict { actual, .. } if actual == expected => {
                StoreError::EmptySession(session_id)
            }
            e => e,
        }
    }
}

#[async_trait]
impl BazaarStore for PostgresStore {
    async fn insert_event(&self, event: EventRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, name, starts_at, ends_at, registration_opens_at,
                                registration_closes_at, article_edit_deadline, commission_percent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.name)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.registration_opens_at)
        .bind(event.registration_closes_at)
        .bind(event.article_edit_deadline)
        .bind(i16::from(event.commission_percent))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn event(&self, id: EventId) -> Result<Option<EventRecord>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_event).transpose()
    }

    async fn insert_seller(&self, seller: SellerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sellers (id, event_id, user_id, seller_number, role, can_bill)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(seller.id.as_uuid())
        .bind(seller.event_id.as_uuid())
        .bind(seller.user_id.as_uuid())
        .bind(seller.seller_number as i32)
        .bind(seller.role.as_str())
        .bind(seller.can_bill)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("sellers_event_number_key")
            {
                return StoreError::DuplicateSellerNumber {
                    event_id: seller.event_id,
                    seller_number: seller.seller_number,
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn seller(&self, id: SellerId) -> Result<Option<SellerRecord>> {
        let row = sqlx::query("SELECT * FROM sellers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_seller).transpose()
    }

    async fn max_seller_number(&self, event_id: EventId) -> Result<Option<u32>> {
        let max: Option<i32> =
            sqlx::query_scalar("SELECT MAX(seller_number) FROM sellers WHERE event_id = $1")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map(|n| n as u32))
    }

    async fn insert_article(&self, article: ArticleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles (id, seller_id, event_id, label_number, name, size, price_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(article.id.as_uuid())
        .bind(article.seller_id.as_uuid())
        .bind(article.event_id.as_uuid())
        .bind(article.label_number as i32)
        .bind(&article.name)
        .bind(&article.size)
        .bind(article.price.cents())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("articles_seller_label_key")
            {
                return StoreError::DuplicateLabelNumber {
                    seller_id: article.seller_id,
                    label_number: article.label_number,
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn update_article(&self, article: &ArticleRecord) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE articles SET name = $2, size = $3, price_cents = $4 WHERE id = $1",
        )
        .bind(article.id.as_uuid())
        .bind(&article.name)
        .bind(&article.size)
        .bind(article.price.cents())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_article(&self, id: ArticleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn article(&self, id: ArticleId) -> Result<Option<ArticleRecord>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_article).transpose()
    }

    async fn article_by_label(
        &self,
        event_id: EventId,
        seller_number: u32,
        label_number: u32,
    ) -> Result<Option<ArticleRecord>> {
        let row = sqlx::query(
            r#"
            SELECT a.*
            FROM articles a
            JOIN sellers s ON s.id = a.seller_id
            WHERE s.event_id = $1 AND s.seller_number = $2 AND a.label_number = $3
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(seller_number as i32)
        .bind(label_number as i32)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_article).transpose()
    }

    async fn articles_for_seller(&self, seller_id: SellerId) -> Result<Vec<ArticleRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM articles WHERE seller_id = $1 ORDER BY label_number ASC",
        )
        .bind(seller_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_article).collect()
    }

    async fn article_count_for_seller(&self, seller_id: SellerId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE seller_id = $1")
                .bind(seller_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn max_label_number(&self, seller_id: SellerId) -> Result<Option<u32>> {
        let max: Option<i32> =
            sqlx::query_scalar("SELECT MAX(label_number) FROM articles WHERE seller_id = $1")
                .bind(seller_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map(|n| n as u32))
    }

    async fn insert_checkout(&self, checkout: CheckoutRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkouts (id, event_id, operator, created_at, status, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(checkout.id.as_uuid())
        .bind(checkout.event_id.as_uuid())
        .bind(checkout.operator.as_uuid())
        .bind(checkout.created_at)
        .bind(checkout.status.as_str())
        .bind(checkout.version.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn checkout(&self, id: CheckoutId) -> Result<Option<CheckoutRecord>> {
        let row = sqlx::query("SELECT * FROM checkouts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_checkout).transpose()
    }

    async fn complete_checkout(
        &self,
        id: CheckoutId,
        expected: Version,
        completed_at: DateTime<Utc>,
    ) -> Result<CheckoutSnapshot> {
        // The aggregate subquery runs in the same statement snapshot as the
        // status flip, so the frozen total always matches the claim set.
        let row = sqlx::query(
            r#"
            UPDATE checkouts
            SET status = $3, version = checkouts.version + 1, completed_at = $4,
                article_count = agg.cnt, total_cents = agg.total
            FROM (
                SELECT COUNT(*)::INT AS cnt,
                       COALESCE(SUM(a.price_cents), 0)::BIGINT AS total
                FROM claims c
                JOIN articles a ON a.id = c.article_id
                WHERE c.kind = $5 AND c.session_id = $1
            ) AS agg
            WHERE checkouts.id = $1 AND checkouts.version = $2 AND agg.cnt > 0
            RETURNING checkouts.version, agg.cnt, agg.total
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_i64())
        .bind(SessionStatus::Completed.as_str())
        .bind(completed_at)
        .bind(ClaimKind::Checkout.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(CheckoutSnapshot {
                version: Version::new(row.try_get("version")?),
                article_count: row.try_get::<i32, _>("cnt")? as u32,
                total: Money::from_cents(row.try_get::<i64, _>("total")?),
            }),
            None => Err(self
                .completion_conflict("checkouts", id.as_uuid(), expected)
                .await),
        }
    }

    async fn cancel_checkout(&self, id: CheckoutId, expected: Version) -> Result<(Version, u64)> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE checkouts SET status = $3, version = version + 1 WHERE id = $1 AND version = $2",
        )
        .bind(id.as_uuid())
        .bind(expected.as_i64())
        .bind(SessionStatus::Cancelled.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            drop(tx);
            return Err(self
                .finalizer_conflict("checkouts", id.as_uuid(), expected)
                .await);
        }

        let released = sqlx::query("DELETE FROM claims WHERE kind = $1 AND session_id = $2")
            .bind(ClaimKind::Checkout.as_str())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok((expected.next(), released))
    }

    async fn insert_billing(&self, billing: BillingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO billings (id, event_id, seller_id, operator, created_at, status, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(billing.id.as_uuid())
        .bind(billing.event_id.as_uuid())
        .bind(billing.seller_id.as_uuid())
        .bind(billing.operator.as_uuid())
        .bind(billing.created_at)
        .bind(billing.status.as_str())
        .bind(billing.version.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn billing(&self, id: BillingId) -> Result<Option<BillingRecord>> {
        let row = sqlx::query("SELECT * FROM billings WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_billing).transpose()
    }

    async fn complete_billing(
        &self,
        id: BillingId,
        expected: Version,
        commission_percent: u8,
        completed_at: DateTime<Utc>,
    ) -> Result<BillingSnapshot> {
        // Payout arithmetic matches Money::percent: fee rounded half-up,
        // computed on the same snapshot that freezes the claim set.
        let row = sqlx::query(
            r#"
            UPDATE billings
            SET status = $3, version = billings.version + 1, completed_at = $4,
                article_count = agg.cnt, total_cents = agg.total,
                payout_cents = agg.total - (agg.total * $6 + 50) / 100
            FROM (
                SELECT COUNT(*)::INT AS cnt,
                       COALESCE(SUM(a.price_cents), 0)::BIGINT AS total
                FROM claims c
                JOIN articles a ON a.id = c.article_id
                WHERE c.kind = $5 AND c.session_id = $1
            ) AS agg
            WHERE billings.id = $1 AND billings.version = $2 AND agg.cnt > 0
            RETURNING billings.version, agg.cnt, agg.total,
                      agg.total - (agg.total * $6 + 50) / 100 AS payout
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_i64())
        .bind(SessionStatus::Completed.as_str())
        .bind(completed_at)
        .bind(ClaimKind::Billing.as_str())
        .bind(i64::from(commission_percent))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(BillingSnapshot {
                version: Version::new(row.try_get("version")?),
                article_count: row.try_get::<i32, _>("cnt")? as u32,
                total: Money::from_cents(row.try_get::<i64, _>("total")?),
                payout: Money::from_cents(row.try_get::<i64, _>("payout")?),
            }),
            None => Err(self
                .completion_conflict("billings", id.as_uuid(), expected)
                .await),
        }
    }

    async fn cancel_billing(&self, id: BillingId, expected: Version) -> Result<(Version, u64)> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE billings SET status = $3, version = version + 1 WHERE id = $1 AND version = $2",
        )
        .bind(id.as_uuid())
        .bind(expected.as_i64())
        .bind(SessionStatus::Cancelled.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            drop(tx);
            return Err(self
                .finalizer_conflict("billings", id.as_uuid(), expected)
                .await);
        }

        let released = sqlx::query("DELETE FROM claims WHERE kind = $1 AND session_id = $2")
            .bind(ClaimKind::Billing.as_str())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok((expected.next(), released))
    }

    async fn try_claim(
        &self,
        kind: ClaimKind,
        article_id: ArticleId,
        session_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        // Single-statement check-and-set: on conflict the no-op update makes
        // the INSERT return the existing row, so the current holder comes
        // back in the same round trip that tried to take the slot.
        let holder: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO claims (kind, article_id, session_id, claimed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (kind, article_id)
            DO UPDATE SET session_id = claims.session_id
            RETURNING session_id
            "#,
        )
        .bind(kind.as_str())
        .bind(article_id.as_uuid())
        .bind(session_id)
        .bind(claimed_at)
        .fetch_one(&self.pool)
        .await?;

        if holder == session_id {
            Ok(ClaimOutcome::Granted)
        } else {
            tracing::debug!(%kind, %article_id, %holder, "claim slot already held");
            Ok(ClaimOutcome::Held { holder })
        }
    }

    async fn release_claim(
        &self,
        kind: ClaimKind,
        article_id: ArticleId,
        session_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM claims WHERE kind = $1 AND article_id = $2 AND session_id = $3",
        )
        .bind(kind.as_str())
        .bind(article_id.as_uuid())
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_claims_for_session(&self, kind: ClaimKind, session_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM claims WHERE kind = $1 AND session_id = $2")
            .bind(kind.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn claims_for_session(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
    ) -> Result<Vec<ClaimRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT kind, article_id, session_id, position, claimed_at
            FROM claims
            WHERE kind = $1 AND session_id = $2
            ORDER BY position ASC
            "#,
        )
        .bind(kind.as_str())
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_claim).collect()
    }

    async fn claim_holder(&self, kind: ClaimKind, article_id: ArticleId) -> Result<Option<Uuid>> {
        let holder: Option<Uuid> = sqlx::query_scalar(
            "SELECT session_id FROM claims WHERE kind = $1 AND article_id = $2",
        )
        .bind(kind.as_str())
        .bind(article_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(holder)
    }

    async fn claim_lines_for_session(
        &self,
        kind: ClaimKind,
        session_id: Uuid,
    ) -> Result<Vec<ClaimLine>> {
        let rows = sqlx::query(
            r#"
            SELECT c.article_id, a.price_cents
            FROM claims c
            JOIN articles a ON a.id = c.article_id
            WHERE c.kind = $1 AND c.session_id = $2
            ORDER BY c.position ASC
            "#,
        )
        .bind(kind.as_str())
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ClaimLine {
                    article_id: ArticleId::from_uuid(row.try_get::<Uuid, _>("article_id")?),
                    price: Money::from_cents(row.try_get::<i64, _>("price_cents")?),
                })
            })
            .collect()
    }
}
