use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use zapvendas_db::models::flow::{
    ChatbotFlow, ConversationData, ConversationStateRow, FlowStep, FlowTrigger, ResponseSettings,
};
use zapvendas_db::models::store::{Product, RedeemCode, Subscription, Transaction, User};

use crate::engine::store::{EngineStore, PurchaseOutcome, RedeemClaim};

/// In-memory store for the engine and coordinator test suites. A single
/// mutex guards the whole state, which makes every multi-row operation
/// atomic the same way the Postgres transactions do.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: Vec<User>,
    products: Vec<Product>,
    subscriptions: Vec<Subscription>,
    transactions: Vec<Transaction>,
    redeem_codes: Vec<RedeemCode>,
    flows: Vec<ChatbotFlow>,
    steps: Vec<FlowStep>,
    triggers: Vec<FlowTrigger>,
    conversations: HashMap<i64, ConversationStateRow>,
    settings: Option<ResponseSettings>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_flow(&self, name: &str, active: bool) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        inner.flows.push(ChatbotFlow {
            id,
            name: name.to_string(),
            description: String::new(),
            active,
        });
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_step(
        &self,
        flow_id: i64,
        step_order: i32,
        message_template: &str,
        expected_responses: Option<&str>,
        action_type: &str,
        next_step_id: Option<i64>,
        next_flow_id: Option<i64>,
    ) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        inner.steps.push(FlowStep {
            id,
            flow_id,
            step_order,
            message_template: message_template.to_string(),
            expected_responses: expected_responses.map(|s| s.to_string()),
            action_type: action_type.to_string(),
            next_step_id,
            next_flow_id,
        });
        id
    }

    pub fn link_steps(&self, step_id: i64, next_step_id: i64) {
        let mut inner = self.inner();
        if let Some(step) = inner.steps.iter_mut().find(|s| s.id == step_id) {
            step.next_step_id = Some(next_step_id);
        }
    }

    pub fn add_trigger(&self, flow_id: i64, keyword: &str, is_exact_match: bool, priority: i32) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        inner.triggers.push(FlowTrigger {
            id,
            flow_id,
            keyword: keyword.to_string(),
            is_exact_match,
            priority,
        });
        id
    }

    pub fn add_product(&self, name: &str, price: f64, active: bool) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        inner.products.push(Product {
            id,
            name: name.to_string(),
            description: String::new(),
            price,
            active,
        });
        id
    }

    pub fn add_redeem_code(&self, code: &str, product_id: Option<i64>) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        inner.redeem_codes.push(RedeemCode {
            id,
            code: code.to_string(),
            product_id,
            transaction_id: None,
            status: "available".to_string(),
            created_at: Utc::now(),
            used_at: None,
        });
        id
    }

    /// Code already bound to a transaction but not yet claimed, the shape a
    /// pre-sold access code has before the buyer redeems it.
    pub fn add_bound_redeem_code(
        &self,
        code: &str,
        product_id: Option<i64>,
        transaction_id: i64,
    ) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        inner.redeem_codes.push(RedeemCode {
            id,
            code: code.to_string(),
            product_id,
            transaction_id: Some(transaction_id),
            status: "available".to_string(),
            created_at: Utc::now(),
            used_at: None,
        });
        id
    }

    pub fn set_settings(&self, settings: ResponseSettings) {
        self.inner().settings = Some(settings);
    }

    pub fn add_subscription(&self, user_id: i64, product_id: i64, days_from_now: i64) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        let now = Utc::now();
        let expiry = now + Duration::days(days_from_now);
        inner.subscriptions.push(Subscription {
            id,
            user_id,
            product_id,
            start_date: now,
            expiry_date: expiry,
            status: "active".to_string(),
            auto_renew: true,
            last_reminder_sent: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    /// Subscription that already ran out, the shape a row has after the
    /// expiry sweep flipped it.
    pub fn add_expired_subscription(&self, user_id: i64, product_id: i64, days_ago: i64) -> i64 {
        let mut inner = self.inner();
        let id = inner.next_id();
        let now = Utc::now();
        let expiry = now - Duration::days(days_ago);
        inner.subscriptions.push(Subscription {
            id,
            user_id,
            product_id,
            start_date: expiry - Duration::days(30),
            expiry_date: expiry,
            status: "expired".to_string(),
            auto_renew: false,
            last_reminder_sent: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn user_by_number(&self, whatsapp_number: &str) -> Option<User> {
        self.inner()
            .users
            .iter()
            .find(|u| u.whatsapp_number == whatsapp_number)
            .cloned()
    }

    pub fn conversation_row(&self, user_id: i64) -> Option<ConversationStateRow> {
        self.inner().conversations.get(&user_id).cloned()
    }

    pub fn transaction_by_id(&self, id: i64) -> Option<Transaction> {
        self.inner().transactions.iter().find(|t| t.id == id).cloned()
    }

    pub fn subscriptions_for(&self, user_id: i64) -> Vec<Subscription> {
        self.inner()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn codes_bound_to(&self, transaction_id: i64) -> Vec<RedeemCode> {
        self.inner()
            .redeem_codes
            .iter()
            .filter(|c| c.transaction_id == Some(transaction_id))
            .cloned()
            .collect()
    }

    pub fn code_by_value(&self, code: &str) -> Option<RedeemCode> {
        self.inner()
            .redeem_codes
            .iter()
            .find(|c| c.code == code)
            .cloned()
    }
}

fn upsert_subscription(inner: &mut Inner, user_id: i64, product_id: i64, days: i64) -> Subscription {
    let now = Utc::now();
    let current = inner
        .subscriptions
        .iter_mut()
        .filter(|s| {
            s.user_id == user_id
                && s.product_id == product_id
                && (s.status == "active" || s.status == "expired")
        })
        .max_by_key(|s| s.expiry_date);

    if let Some(sub) = current {
        sub.expiry_date = if sub.status == "active" && sub.expiry_date > now {
            sub.expiry_date + Duration::days(days)
        } else {
            now + Duration::days(days)
        };
        sub.status = "active".to_string();
        sub.updated_at = now;
        return sub.clone();
    }

    let id = inner.next_id();
    let sub = Subscription {
        id,
        user_id,
        product_id,
        start_date: now,
        expiry_date: now + Duration::days(days),
        status: "active".to_string(),
        auto_renew: true,
        last_reminder_sent: None,
        created_at: now,
        updated_at: now,
    };
    inner.subscriptions.push(sub.clone());
    sub
}

fn bind_code(inner: &mut Inner, transaction_id: i64, product_id: Option<i64>) -> Option<RedeemCode> {
    if let Some(existing) = inner
        .redeem_codes
        .iter()
        .find(|c| c.transaction_id == Some(transaction_id))
    {
        return Some(existing.clone());
    }
    let product_id = product_id?;
    let code = inner
        .redeem_codes
        .iter_mut()
        .filter(|c| c.status == "available" && c.transaction_id.is_none() && c.product_id == Some(product_id))
        .min_by_key(|c| c.id)?;
    code.transaction_id = Some(transaction_id);
    code.status = "expired".to_string();
    code.used_at = Some(Utc::now());
    Some(code.clone())
}

#[async_trait]
impl EngineStore for InMemoryStore {
    async fn get_or_create_user(&self, whatsapp_number: &str) -> Result<User> {
        let mut inner = self.inner();
        if let Some(user) = inner
            .users
            .iter()
            .find(|u| u.whatsapp_number == whatsapp_number)
        {
            return Ok(user.clone());
        }
        let id = inner.next_id();
        let user = User {
            id,
            whatsapp_number: whatsapp_number.to_string(),
            name: None,
            registered_at: Utc::now(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner().users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_number_fragment(&self, digits: &str) -> Result<Option<User>> {
        Ok(self
            .inner()
            .users
            .iter()
            .find(|u| u.whatsapp_number.contains(digits))
            .cloned())
    }

    async fn all_user_numbers(&self) -> Result<Vec<String>> {
        let inner = self.inner();
        let mut users: Vec<&User> = inner.users.iter().collect();
        users.sort_by_key(|u| u.id);
        Ok(users.iter().map(|u| u.whatsapp_number.clone()).collect())
    }

    async fn conversation(&self, user_id: i64) -> Result<ConversationStateRow> {
        let mut inner = self.inner();
        if let Some(row) = inner.conversations.get(&user_id) {
            return Ok(row.clone());
        }
        let id = inner.next_id();
        let row = ConversationStateRow {
            id,
            user_id,
            current_flow_id: None,
            current_step_id: None,
            last_message_timestamp: Utc::now(),
            data: "{}".to_string(),
        };
        inner.conversations.insert(user_id, row.clone());
        Ok(row)
    }

    async fn enter_step(
        &self,
        user_id: i64,
        flow_id: i64,
        step_id: i64,
        data: &ConversationData,
    ) -> Result<()> {
        let mut inner = self.inner();
        let row = inner
            .conversations
            .get_mut(&user_id)
            .context("Conversation state missing")?;
        row.current_flow_id = Some(flow_id);
        row.current_step_id = Some(step_id);
        row.data = data.to_json();
        row.last_message_timestamp = Utc::now();
        Ok(())
    }

    async fn save_data(&self, user_id: i64, data: &ConversationData) -> Result<()> {
        let mut inner = self.inner();
        let row = inner
            .conversations
            .get_mut(&user_id)
            .context("Conversation state missing")?;
        row.data = data.to_json();
        row.last_message_timestamp = Utc::now();
        Ok(())
    }

    async fn reset_conversation(&self, user_id: i64) -> Result<()> {
        let mut inner = self.inner();
        if let Some(row) = inner.conversations.get_mut(&user_id) {
            row.current_flow_id = None;
            row.current_step_id = None;
            row.data = "{}".to_string();
            row.last_message_timestamp = Utc::now();
        }
        Ok(())
    }

    async fn active_triggers(&self) -> Result<Vec<FlowTrigger>> {
        let inner = self.inner();
        Ok(inner
            .triggers
            .iter()
            .filter(|t| {
                inner
                    .flows
                    .iter()
                    .any(|f| f.id == t.flow_id && f.active)
            })
            .cloned()
            .collect())
    }

    async fn get_flow(&self, id: i64) -> Result<Option<ChatbotFlow>> {
        Ok(self
            .inner()
            .flows
            .iter()
            .find(|f| f.id == id && f.active)
            .cloned())
    }

    async fn first_step(&self, flow_id: i64) -> Result<Option<FlowStep>> {
        Ok(self
            .inner()
            .steps
            .iter()
            .find(|s| s.flow_id == flow_id && s.step_order == 1)
            .cloned())
    }

    async fn get_step(&self, step_id: i64) -> Result<Option<FlowStep>> {
        Ok(self.inner().steps.iter().find(|s| s.id == step_id).cloned())
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self
            .inner()
            .products
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect();
        products.sort_by_key(|p| p.id);
        Ok(products)
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.inner().products.iter().find(|p| p.id == id).cloned())
    }

    async fn response_settings(&self) -> Result<ResponseSettings> {
        Ok(self.inner().settings.clone().unwrap_or_default())
    }

    async fn active_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .inner()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status == "active")
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.expiry_date);
        Ok(subs)
    }

    async fn recently_expired_subscription(
        &self,
        user_id: i64,
        within_days: i64,
    ) -> Result<Option<Subscription>> {
        let cutoff = Utc::now() - Duration::days(within_days);
        Ok(self
            .inner()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status == "expired" && s.expiry_date >= cutoff)
            .max_by_key(|s| s.expiry_date)
            .cloned())
    }

    async fn expire_overdue_subscriptions(&self) -> Result<u64> {
        let mut inner = self.inner();
        let now = Utc::now();
        let mut flipped = 0;
        for sub in inner
            .subscriptions
            .iter_mut()
            .filter(|s| s.status == "active" && s.expiry_date < now)
        {
            sub.status = "expired".to_string();
            sub.updated_at = now;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn subscriptions_due_for_reminder(&self, days: i64) -> Result<Vec<Subscription>> {
        let now = Utc::now();
        let horizon = now + Duration::days(days);
        Ok(self
            .inner()
            .subscriptions
            .iter()
            .filter(|s| {
                s.status == "active"
                    && s.expiry_date >= now
                    && s.expiry_date <= horizon
                    && s.last_reminder_sent
                        .map(|sent| sent < now - Duration::days(1))
                        .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn mark_reminder_sent(&self, subscription_id: i64) -> Result<()> {
        let mut inner = self.inner();
        if let Some(sub) = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
        {
            sub.last_reminder_sent = Some(Utc::now());
        }
        Ok(())
    }

    async fn create_pending_transaction(
        &self,
        user_id: Option<i64>,
        product_id: Option<i64>,
        amount: f64,
        payment_method: &str,
        payment_ref: &str,
    ) -> Result<Transaction> {
        let mut inner = self.inner();
        let id = inner.next_id();
        let now = Utc::now();
        let transaction = Transaction {
            id,
            user_id,
            product_id,
            amount,
            status: "pending".to_string(),
            payment_method: payment_method.to_string(),
            payment_method_id: Some(payment_ref.to_string()),
            created_at: now,
            updated_at: now,
        };
        inner.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        Ok(self.inner().transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn get_transaction_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<Transaction>> {
        Ok(self
            .inner()
            .transactions
            .iter()
            .find(|t| t.payment_method_id.as_deref() == Some(payment_ref))
            .cloned())
    }

    async fn complete_purchase(&self, transaction_id: i64, days: i64) -> Result<PurchaseOutcome> {
        let mut inner = self.inner();

        let (user_id, product_id, first_settle) = {
            let transaction = inner
                .transactions
                .iter_mut()
                .find(|t| t.id == transaction_id)
                .context("Transaction not found for settlement")?;
            let first_settle = !transaction.is_paid();
            transaction.status = "paid".to_string();
            transaction.updated_at = Utc::now();
            (transaction.user_id, transaction.product_id, first_settle)
        };

        let code = bind_code(&mut inner, transaction_id, product_id);

        let mut subscription = None;
        if first_settle {
            if let (Some(user_id), Some(product_id)) = (user_id, product_id) {
                subscription = Some(upsert_subscription(&mut inner, user_id, product_id, days));
            }
        }

        let transaction = inner
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned()
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
        let mut inner = self.inner();
        let product_id = inner
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .context("Transaction not found for code issuance")?
            .product_id;
        Ok(bind_code(&mut inner, transaction_id, product_id))
    }

    async fn redeem_code_for_user(
        &self,
        code: &str,
        user_id: i64,
        days: i64,
    ) -> Result<Option<RedeemClaim>> {
        let mut inner = self.inner();

        let claimed = match inner
            .redeem_codes
            .iter_mut()
            .find(|c| c.code == code && c.status == "available")
        {
            Some(c) => {
                c.status = "expired".to_string();
                c.used_at = Some(Utc::now());
                c.clone()
            }
            None => return Ok(None),
        };

        if let Some(transaction_id) = claimed.transaction_id {
            if let Some(transaction) = inner
                .transactions
                .iter_mut()
                .find(|t| t.id == transaction_id && t.user_id.is_none())
            {
                transaction.user_id = Some(user_id);
            }
        }

        let subscription = match claimed.product_id {
            Some(product_id) => Some(upsert_subscription(&mut inner, user_id, product_id, days)),
            None => None,
        };

        Ok(Some(RedeemClaim {
            code: claimed,
            subscription,
        }))
    }
}
