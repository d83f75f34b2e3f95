use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::flow::ResponseSettings;

#[derive(Debug, Clone)]
pub struct ResponseSettingsRepository {
    pool: PgPool,
}

impl ResponseSettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Single-row settings table; defaults apply when nothing was saved yet.
    pub async fn get(&self) -> Result<ResponseSettings> {
        let row = sqlx::query_as::<_, ResponseSettings>(
            "SELECT * FROM response_settings ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch response settings")?;
        Ok(row.unwrap_or_default())
    }
}
