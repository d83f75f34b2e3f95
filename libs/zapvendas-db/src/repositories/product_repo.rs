use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::store::Product;

#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Product>> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch product by ID")
    }

    /// Active catalog in stable display order (the listing index shown to
    /// users is derived from this ordering).
    pub async fn get_active(&self) -> Result<Vec<Product>> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE active = TRUE ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch active products")
    }
}
