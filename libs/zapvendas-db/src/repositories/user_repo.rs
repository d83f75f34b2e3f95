use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::store::User;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by ID")
    }

    pub async fn get_by_number(&self, whatsapp_number: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE whatsapp_number = $1")
            .bind(whatsapp_number)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by number")
    }

    /// Best-effort substring lookup. Deliberately lossy: short numbers can
    /// collide, and stored numbers may carry normalization differences the
    /// exact lookup would miss. Kept as-is on purpose.
    pub async fn find_by_number_fragment(&self, digits: &str) -> Result<Option<User>> {
        let pattern = format!("%{}%", digits);
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE whatsapp_number LIKE $1 ORDER BY id LIMIT 1",
        )
        .bind(&pattern)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by number fragment")
    }

    pub async fn list_numbers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT whatsapp_number FROM users ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .context("Failed to list user numbers")?;
        Ok(rows.into_iter().map(|(number,)| number).collect())
    }

    pub async fn get_or_create(&self, whatsapp_number: &str) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (whatsapp_number)
            VALUES ($1)
            ON CONFLICT (whatsapp_number) DO UPDATE SET whatsapp_number = excluded.whatsapp_number
            RETURNING *
            "#,
        )
        .bind(whatsapp_number)
        .fetch_one(&self.pool)
        .await
        .context("Failed to get or create user")
    }

    pub async fn update_name(&self, id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE users SET name = $1 WHERE id = $2")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update user name")?;
        Ok(())
    }
}
