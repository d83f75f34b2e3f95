use anyhow::{Context, Result};
use async_trait::async_trait;
use zapvendas_db::models::flow::{
    ChatbotFlow, ConversationData, ConversationStateRow, FlowStep, FlowTrigger, ResponseSettings,
};
use zapvendas_db::models::store::{Product, RedeemCode, Subscription, Transaction, User};
use zapvendas_db::repositories::{
    ConversationRepository, FlowRepository, ProductRepository, RedeemCodeRepository,
    ResponseSettingsRepository, SubscriptionRepository, TransactionRepository, UserRepository,
};
use zapvendas_db::sqlx::PgPool;

use crate::engine::store::{EngineStore, PurchaseOutcome, RedeemClaim};

/// Postgres-backed store. Thin delegation to the repositories, except the
/// settlement path which owns the cross-table transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    users: UserRepository,
    products: ProductRepository,
    subscriptions: SubscriptionRepository,
    transactions: TransactionRepository,
    flows: FlowRepository,
    conversations: ConversationRepository,
    settings: ResponseSettingsRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            products: ProductRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool.clone()),
            flows: FlowRepository::new(pool.clone()),
            conversations: ConversationRepository::new(pool.clone()),
            settings: ResponseSettingsRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl EngineStore for PgStore {
    async fn get_or_create_user(&self, whatsapp_number: &str) -> Result<User> {
        self.users.get_or_create(whatsapp_number).await
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.users.get_by_id(id).await
    }

    async fn find_user_by_number_fragment(&self, digits: &str) -> Result<Option<User>> {
        self.users.find_by_number_fragment(digits).await
    }

    async fn all_user_numbers(&self) -> Result<Vec<String>> {
        self.users.list_numbers().await
    }

    async fn conversation(&self, user_id: i64) -> Result<ConversationStateRow> {
        self.conversations.get_or_create(user_id).await
    }

    async fn enter_step(
        &self,
        user_id: i64,
        flow_id: i64,
        step_id: i64,
        data: &ConversationData,
    ) -> Result<()> {
        self.conversations
            .enter_step(user_id, flow_id, step_id, data)
            .await
    }

    async fn save_data(&self, user_id: i64, data: &ConversationData) -> Result<()> {
        self.conversations.save_data(user_id, data).await
    }

    async fn reset_conversation(&self, user_id: i64) -> Result<()> {
        self.conversations.reset(user_id).await
    }

    async fn active_triggers(&self) -> Result<Vec<FlowTrigger>> {
        self.flows.get_active_triggers().await
    }

    async fn get_flow(&self, id: i64) -> Result<Option<ChatbotFlow>> {
        self.flows.get_active(id).await
    }

    async fn first_step(&self, flow_id: i64) -> Result<Option<FlowStep>> {
        self.flows.get_first_step(flow_id).await
    }

    async fn get_step(&self, step_id: i64) -> Result<Option<FlowStep>> {
        self.flows.get_step(step_id).await
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        self.products.get_active().await
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        self.products.get_by_id(id).await
    }

    async fn response_settings(&self) -> Result<ResponseSettings> {
        self.settings.get().await
    }

    async fn active_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>> {
        self.subscriptions.get_active_by_user(user_id).await
    }

    async fn recently_expired_subscription(
        &self,
        user_id: i64,
        within_days: i64,
    ) -> Result<Option<Subscription>> {
        self.subscriptions
            .get_recently_expired(user_id, within_days)
            .await
    }

    async fn expire_overdue_subscriptions(&self) -> Result<u64> {
        self.subscriptions.expire_overdue().await
    }

    async fn subscriptions_due_for_reminder(&self, days: i64) -> Result<Vec<Subscription>> {
        self.subscriptions.get_due_for_reminder(days).await
    }

    async fn mark_reminder_sent(&self, subscription_id: i64) -> Result<()> {
        self.subscriptions.mark_reminder_sent(subscription_id).await
    }

    async fn create_pending_transaction(
        &self,
        user_id: Option<i64>,
        product_id: Option<i64>,
        amount: f64,
        payment_method: &str,
        payment_ref: &str,
    ) -> Result<Transaction> {
        self.transactions
            .create_pending(user_id, product_id, amount, payment_method, payment_ref)
            .await
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        self.transactions.get_by_id(id).await
    }

    async fn get_transaction_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<Transaction>> {
        self.transactions.get_by_payment_ref(payment_ref).await
    }

    async fn complete_purchase(&self, transaction_id: i64, days: i64) -> Result<PurchaseOutcome> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let record = zapvendas_db::sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock transaction for settlement")?
        .context("Transaction not found for settlement")?;

        let first_settle = TransactionRepository::settle_in_tx(&mut tx, transaction_id).await?;

        let mut code =
            RedeemCodeRepository::get_by_transaction_in_tx(&mut tx, transaction_id).await?;
        if code.is_none() {
            if let Some(product_id) = record.product_id {
                code = RedeemCodeRepository::claim_for_transaction_in_tx(
                    &mut tx,
                    transaction_id,
                    product_id,
                )
                .await?;
            }
        }

        let mut subscription = None;
        if first_settle {
            if let (Some(user_id), Some(product_id)) = (record.user_id, record.product_id) {
                subscription =
                    Some(SubscriptionRepository::upsert_in_tx(&mut tx, user_id, product_id, days).await?);
            }
        }

        tx.commit().await.context("Failed to commit settlement")?;

        let transaction = self
            .transactions
            .get_by_id(transaction_id)
            .await?
            .context("Transaction vanished after settlement")?;

        Ok(PurchaseOutcome {
            first_settle,
            transaction,
            code,
            subscription,
        })
    }

    async fn issue_code_for_transaction(
        &self,
        transaction_id: i64,
    ) -> Result<Option<RedeemCode>> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let mut code =
            RedeemCodeRepository::get_by_transaction_in_tx(&mut tx, transaction_id).await?;
        if code.is_none() {
            let record = zapvendas_db::sqlx::query_as::<_, Transaction>(
                "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
            )
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock transaction for code issuance")?
            .context("Transaction not found for code issuance")?;

            if let Some(product_id) = record.product_id {
                code = RedeemCodeRepository::claim_for_transaction_in_tx(
                    &mut tx,
                    transaction_id,
                    product_id,
                )
                .await?;
            }
        }

        tx.commit().await.context("Failed to commit code issuance")?;
        Ok(code)
    }

    async fn redeem_code_for_user(
        &self,
        code: &str,
        user_id: i64,
        days: i64,
    ) -> Result<Option<RedeemClaim>> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let claimed = match RedeemCodeRepository::claim_by_code_in_tx(&mut tx, code).await? {
            Some(code) => code,
            None => return Ok(None),
        };

        if let Some(transaction_id) = claimed.transaction_id {
            TransactionRepository::attach_user_in_tx(&mut tx, transaction_id, user_id).await?;
        }

        let mut subscription = None;
        if let Some(product_id) = claimed.product_id {
            subscription =
                Some(SubscriptionRepository::upsert_in_tx(&mut tx, user_id, product_id, days).await?);
        }

        tx.commit().await.context("Failed to commit redemption")?;

        Ok(Some(RedeemClaim {
            code: claimed,
            subscription,
        }))
    }
}
