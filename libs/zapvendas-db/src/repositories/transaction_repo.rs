use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction as PgTx};

use crate::models::store::Transaction;

#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch transaction by ID")
    }

    pub async fn get_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE payment_method_id = $1",
        )
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction by payment ref")
    }

    pub async fn create_pending(
        &self,
        user_id: Option<i64>,
        product_id: Option<i64>,
        amount: f64,
        payment_method: &str,
        payment_ref: &str,
    ) -> Result<Transaction> {
        sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (user_id, product_id, amount, status, payment_method, payment_method_id)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .bind(amount)
        .bind(payment_method)
        .bind(payment_ref)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create pending transaction")
    }

    /// Compare-and-swap to `paid`. Returns true only on the first transition
    /// so concurrent polls/webhooks settle a payment exactly once.
    pub async fn settle_in_tx(tx: &mut PgTx<'_, Postgres>, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'paid', updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status NOT IN ('paid', 'approved')
            "#,
        )
        .bind(id)
        .execute(&mut **tx)
        .await
        .context("Failed to settle transaction")?;
        Ok(result.rows_affected() > 0)
    }

    /// Binds an anonymous transaction to the redeeming user.
    pub async fn attach_user_in_tx(
        tx: &mut PgTx<'_, Postgres>,
        id: i64,
        user_id: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE transactions SET user_id = $1 WHERE id = $2 AND user_id IS NULL")
            .bind(user_id)
            .bind(id)
            .execute(&mut **tx)
            .await
            .context("Failed to attach user to transaction")?;
        Ok(())
    }
}
