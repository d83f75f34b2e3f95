use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::flow::{ConversationData, ConversationStateRow};

#[derive(Debug, Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lazily creates the per-user cursor on first contact.
    pub async fn get_or_create(&self, user_id: i64) -> Result<ConversationStateRow> {
        if let Some(state) = sqlx::query_as::<_, ConversationStateRow>(
            "SELECT * FROM user_conversation_states WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch conversation state")?
        {
            return Ok(state);
        }

        sqlx::query_as::<_, ConversationStateRow>(
            r#"
            INSERT INTO user_conversation_states (user_id, data)
            VALUES ($1, '{}')
            ON CONFLICT (user_id) DO UPDATE SET user_id = excluded.user_id
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create conversation state")
    }

    pub async fn enter_step(
        &self,
        user_id: i64,
        flow_id: i64,
        step_id: i64,
        data: &ConversationData,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_conversation_states
            SET current_flow_id = $1, current_step_id = $2, data = $3,
                last_message_timestamp = CURRENT_TIMESTAMP
            WHERE user_id = $4
            "#,
        )
        .bind(flow_id)
        .bind(step_id)
        .bind(data.to_json())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to advance conversation cursor")?;
        Ok(())
    }

    pub async fn save_data(&self, user_id: i64, data: &ConversationData) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_conversation_states
            SET data = $1, last_message_timestamp = CURRENT_TIMESTAMP
            WHERE user_id = $2
            "#,
        )
        .bind(data.to_json())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to save conversation data")?;
        Ok(())
    }

    /// Flow completed, cancelled, or dead-ended: clear the cursor and blob.
    pub async fn reset(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_conversation_states
            SET current_flow_id = NULL, current_step_id = NULL, data = '{}',
                last_message_timestamp = CURRENT_TIMESTAMP
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to reset conversation state")?;
        Ok(())
    }
}
