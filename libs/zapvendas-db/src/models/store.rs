use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub whatsapp_number: String,
    pub name: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub start_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    // active, expired, canceled
    pub status: String,
    pub auto_renew: bool,
    pub last_reminder_sent: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub user_id: Option<i64>,
    pub product_id: Option<i64>,
    pub amount: f64,
    // pending, paid, cancelled, error (gateway statuses pass through)
    pub status: String,
    pub payment_method: String,
    pub payment_method_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_paid(&self) -> bool {
        self.status == "paid" || self.status == "approved"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RedeemCode {
    pub id: i64,
    pub code: String,
    pub product_id: Option<i64>,
    pub transaction_id: Option<i64>,
    // available, expired (= consumed)
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}
