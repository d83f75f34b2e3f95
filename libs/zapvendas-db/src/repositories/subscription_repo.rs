use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction as PgTx};

use crate::models::store::Subscription;

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch subscription by ID")
    }

    pub async fn get_active_by_user(&self, user_id: i64) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND status = 'active' ORDER BY expiry_date ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active subscriptions for user")
    }

    /// Most recently expired subscription within the lookback window, if any.
    pub async fn get_recently_expired(
        &self,
        user_id: i64,
        within_days: i64,
    ) -> Result<Option<Subscription>> {
        let cutoff = Utc::now() - Duration::days(within_days);
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status = 'expired' AND expiry_date >= $2
            ORDER BY expiry_date DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch recently expired subscription")
    }

    /// Extend-or-create: at most one effectively current subscription per
    /// (user, product). An active one gets days added to its current expiry;
    /// an expired one restarts from now; otherwise a new row is inserted.
    /// Composes into a caller-owned transaction (settlement and redemption
    /// commit subscription + code together).
    pub async fn upsert_in_tx(
        tx: &mut PgTx<'_, Postgres>,
        user_id: i64,
        product_id: i64,
        days: i64,
    ) -> Result<Subscription> {
        let now = Utc::now();
        let existing = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND product_id = $2 AND status IN ('active', 'expired')
            ORDER BY expiry_date DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to look up current subscription")?;

        if let Some(sub) = existing {
            let new_expiry: DateTime<Utc> = if sub.status == "active" && sub.expiry_date > now {
                sub.expiry_date + Duration::days(days)
            } else {
                now + Duration::days(days)
            };
            sqlx::query_as::<_, Subscription>(
                r#"
                UPDATE subscriptions
                SET expiry_date = $1, status = 'active', updated_at = $2
                WHERE id = $3
                RETURNING *
                "#,
            )
            .bind(new_expiry)
            .bind(now)
            .bind(sub.id)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to extend subscription")
        } else {
            sqlx::query_as::<_, Subscription>(
                r#"
                INSERT INTO subscriptions (user_id, product_id, start_date, expiry_date, status, auto_renew)
                VALUES ($1, $2, $3, $4, 'active', TRUE)
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(product_id)
            .bind(now)
            .bind(now + Duration::days(days))
            .fetch_one(&mut **tx)
            .await
            .context("Failed to create subscription")
        }
    }

    pub async fn cancel(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions SET status = 'canceled', updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to cancel subscription")?;
        Ok(())
    }

    /// Time-based expiry sweep. Returns the number of rows flipped.
    pub async fn expire_overdue(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = CURRENT_TIMESTAMP
            WHERE status = 'active' AND expiry_date < CURRENT_TIMESTAMP
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to expire overdue subscriptions")?;
        Ok(result.rows_affected())
    }

    /// Active subscriptions expiring within `days` whose reminder has not
    /// been sent in the last 24h.
    pub async fn get_due_for_reminder(&self, days: i64) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE status = 'active'
              AND expiry_date BETWEEN CURRENT_TIMESTAMP AND CURRENT_TIMESTAMP + ($1 * interval '1 day')
              AND (last_reminder_sent IS NULL
                   OR last_reminder_sent < CURRENT_TIMESTAMP - interval '1 day')
            "#,
        )
        .bind(days)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch subscriptions due for reminder")
    }

    pub async fn mark_reminder_sent(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions SET last_reminder_sent = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark reminder sent")?;
        Ok(())
    }
}
