use anyhow::{Context, Result};
use sqlx::{Postgres, Transaction as PgTx};

use crate::models::store::RedeemCode;

/// Redeem-code queries. Every write participates in a caller-owned
/// transaction: settlement and redemption commit their multi-table
/// changes together.
#[derive(Debug, Clone)]
pub struct RedeemCodeRepository;

impl RedeemCodeRepository {
    pub async fn get_by_transaction_in_tx(
        tx: &mut PgTx<'_, Postgres>,
        transaction_id: i64,
    ) -> Result<Option<RedeemCode>> {
        sqlx::query_as::<_, RedeemCode>("SELECT * FROM redeem_codes WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&mut **tx)
            .await
            .context("Failed to fetch redeem code by transaction")
    }

    /// Atomically binds one available code for the product to the
    /// transaction and marks it consumed. `SKIP LOCKED` keeps concurrent
    /// claims from racing onto the same row; returns None when the pool for
    /// that product is empty.
    pub async fn claim_for_transaction_in_tx(
        tx: &mut PgTx<'_, Postgres>,
        transaction_id: i64,
        product_id: i64,
    ) -> Result<Option<RedeemCode>> {
        sqlx::query_as::<_, RedeemCode>(
            r#"
            UPDATE redeem_codes
            SET transaction_id = $1, status = 'expired', used_at = CURRENT_TIMESTAMP
            WHERE id = (
                SELECT id FROM redeem_codes
                WHERE status = 'available' AND transaction_id IS NULL AND product_id = $2
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to claim redeem code")
    }

    /// Exclusive one-time claim by code value: flips `available` to
    /// consumed, returning the row only for the winning claimant.
    pub async fn claim_by_code_in_tx(
        tx: &mut PgTx<'_, Postgres>,
        code: &str,
    ) -> Result<Option<RedeemCode>> {
        sqlx::query_as::<_, RedeemCode>(
            r#"
            UPDATE redeem_codes
            SET status = 'expired', used_at = CURRENT_TIMESTAMP
            WHERE code = $1 AND status = 'available'
            RETURNING *
            "#,
        )
        .bind(code)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to claim redeem code by value")
    }
}
