use anyhow::Result;
use async_trait::async_trait;
use zapvendas_db::models::flow::{
    ChatbotFlow, ConversationData, ConversationStateRow, FlowStep, FlowTrigger, ResponseSettings,
};
use zapvendas_db::models::store::{Product, RedeemCode, Subscription, Transaction, User};

/// Result of settling a paid transaction: status flip, code binding and
/// subscription grant happen together or not at all.
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    /// True only for the first settle of this transaction. Repeated polls
    /// and webhook replays come back false and produce no new side effects.
    pub first_settle: bool,
    pub transaction: Transaction,
    /// The code bound to the transaction, freshly claimed or pre-existing.
    /// None when the pool for the product is empty.
    pub code: Option<RedeemCode>,
    pub subscription: Option<Subscription>,
}

/// Outcome of a one-time code redemption.
#[derive(Debug, Clone)]
pub struct RedeemClaim {
    pub code: RedeemCode,
    pub subscription: Option<Subscription>,
}

/// Persistence seam for the flow engine and payment coordinator. The
/// production implementation is Postgres-backed; tests run against the
/// in-memory one.
#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn get_or_create_user(&self, whatsapp_number: &str) -> Result<User>;
    async fn get_user(&self, id: i64) -> Result<Option<User>>;
    async fn find_user_by_number_fragment(&self, digits: &str) -> Result<Option<User>>;
    async fn all_user_numbers(&self) -> Result<Vec<String>>;

    async fn conversation(&self, user_id: i64) -> Result<ConversationStateRow>;
    async fn enter_step(
        &self,
        user_id: i64,
        flow_id: i64,
        step_id: i64,
        data: &ConversationData,
    ) -> Result<()>;
    async fn save_data(&self, user_id: i64, data: &ConversationData) -> Result<()>;
    async fn reset_conversation(&self, user_id: i64) -> Result<()>;

    async fn active_triggers(&self) -> Result<Vec<FlowTrigger>>;
    async fn get_flow(&self, id: i64) -> Result<Option<ChatbotFlow>>;
    async fn first_step(&self, flow_id: i64) -> Result<Option<FlowStep>>;
    async fn get_step(&self, step_id: i64) -> Result<Option<FlowStep>>;

    async fn active_products(&self) -> Result<Vec<Product>>;
    async fn get_product(&self, id: i64) -> Result<Option<Product>>;

    async fn response_settings(&self) -> Result<ResponseSettings>;

    async fn active_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>>;
    async fn recently_expired_subscription(
        &self,
        user_id: i64,
        within_days: i64,
    ) -> Result<Option<Subscription>>;
    async fn expire_overdue_subscriptions(&self) -> Result<u64>;
    async fn subscriptions_due_for_reminder(&self, days: i64) -> Result<Vec<Subscription>>;
    async fn mark_reminder_sent(&self, subscription_id: i64) -> Result<()>;

    async fn create_pending_transaction(
        &self,
        user_id: Option<i64>,
        product_id: Option<i64>,
        amount: f64,
        payment_method: &str,
        payment_ref: &str,
    ) -> Result<Transaction>;
    async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>>;
    async fn get_transaction_by_payment_ref(&self, payment_ref: &str)
        -> Result<Option<Transaction>>;

    /// Settles the transaction and, atomically with the settle, binds a
    /// redeem code and extends/creates the subscription.
    async fn complete_purchase(&self, transaction_id: i64, days: i64) -> Result<PurchaseOutcome>;

    /// Idempotent code binding for an already-paid transaction: returns the
    /// existing bound code or atomically claims an available one for the
    /// transaction's product. None when the pool is empty.
    async fn issue_code_for_transaction(&self, transaction_id: i64)
        -> Result<Option<RedeemCode>>;

    /// Exclusive one-time claim by code value: consumes the code, binds the
    /// claiming user to the code's transaction and activates the
    /// subscription, all in one transaction. None when the code is unknown
    /// or already used.
    async fn redeem_code_for_user(
        &self,
        code: &str,
        user_id: i64,
        days: i64,
    ) -> Result<Option<RedeemClaim>>;
}
