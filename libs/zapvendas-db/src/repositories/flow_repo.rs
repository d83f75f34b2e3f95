use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::flow::{ChatbotFlow, FlowStep, FlowTrigger};

#[derive(Debug, Clone)]
pub struct FlowRepository {
    pool: PgPool,
}

impl FlowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_active(&self, id: i64) -> Result<Option<ChatbotFlow>> {
        sqlx::query_as::<_, ChatbotFlow>(
            "SELECT * FROM chatbot_flows WHERE id = $1 AND active = TRUE",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch flow")
    }

    /// Triggers of active flows only; ordering is left to the resolver.
    pub async fn get_active_triggers(&self) -> Result<Vec<FlowTrigger>> {
        sqlx::query_as::<_, FlowTrigger>(
            r#"
            SELECT t.* FROM chatbot_flow_triggers t
            JOIN chatbot_flows f ON f.id = t.flow_id
            WHERE f.active = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active triggers")
    }

    pub async fn get_first_step(&self, flow_id: i64) -> Result<Option<FlowStep>> {
        sqlx::query_as::<_, FlowStep>(
            "SELECT * FROM chatbot_flow_steps WHERE flow_id = $1 AND step_order = 1",
        )
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch first flow step")
    }

    pub async fn get_step(&self, step_id: i64) -> Result<Option<FlowStep>> {
        sqlx::query_as::<_, FlowStep>("SELECT * FROM chatbot_flow_steps WHERE id = $1")
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch flow step")
    }
}
