use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use zapvendas_db::models::store::{Product, RedeemCode, Subscription};
use zapvendas_db::utils::normalize_phone;

use crate::engine::store::{EngineStore, PurchaseOutcome};
use crate::error::DomainError;

pub mod mercadopix;

pub use mercadopix::MercadoPix;

/// A freshly created PIX charge.
#[derive(Debug, Clone)]
pub struct PixCharge {
    /// Gateway-side payment id.
    pub payment_ref: String,
    /// Copy-paste PIX payload the user pays with.
    pub code_payload: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Unknown,
}

/// Payment gateway seam. Production talks to the PIX HTTP API; tests
/// script the statuses.
#[async_trait]
pub trait PixProvider: Send + Sync {
    async fn create_charge(
        &self,
        amount: f64,
        description: &str,
        payer_email: &str,
    ) -> Result<PixCharge>;

    async fn charge_status(&self, payment_ref: &str) -> Result<PixStatus>;
}

#[derive(Debug, Clone)]
pub struct ChargeTicket {
    pub transaction_id: i64,
    pub payment_ref: String,
    pub code_payload: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub status: PixStatus,
    pub approved: bool,
    /// False when the transaction had already been settled by an earlier
    /// poll or webhook.
    pub first_settle: bool,
    pub code: Option<RedeemCode>,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone)]
pub struct RedeemOutcome {
    pub code: RedeemCode,
    pub product: Option<Product>,
    pub subscription: Option<Subscription>,
}

/// Coordinates charges, settlement and redeem codes between the store and
/// the PIX gateway.
#[derive(Clone)]
pub struct PaymentCoordinator {
    store: Arc<dyn EngineStore>,
    provider: Arc<dyn PixProvider>,
    /// Subscription days granted per purchase or redemption.
    grant_days: i64,
}

impl PaymentCoordinator {
    pub fn new(store: Arc<dyn EngineStore>, provider: Arc<dyn PixProvider>, grant_days: i64) -> Self {
        Self {
            store,
            provider,
            grant_days,
        }
    }

    pub fn grant_days(&self) -> i64 {
        self.grant_days
    }

    /// Creates a PIX charge and records the pending transaction with it.
    pub async fn create_charge(
        &self,
        user_id: i64,
        product: &Product,
        payer_email: &str,
    ) -> Result<ChargeTicket, DomainError> {
        let charge = self
            .provider
            .create_charge(product.price, &product.name, payer_email)
            .await
            .map_err(|e| DomainError::ExternalUnavailable(e.to_string()))?;

        let transaction = self
            .store
            .create_pending_transaction(
                Some(user_id),
                Some(product.id),
                product.price,
                "pix",
                &charge.payment_ref,
            )
            .await?;

        info!(
            transaction_id = transaction.id,
            payment_ref = %charge.payment_ref,
            "Created PIX charge"
        );

        Ok(ChargeTicket {
            transaction_id: transaction.id,
            payment_ref: charge.payment_ref,
            code_payload: charge.code_payload,
            expires_at: charge.expires_at,
        })
    }

    /// Polls the gateway for the transaction's status. Approval settles the
    /// transaction, binds a code and extends the subscription atomically;
    /// repeated polls are no-ops past the first settle.
    pub async fn poll_status(&self, transaction_id: i64) -> Result<PollOutcome, DomainError> {
        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(DomainError::NotFound("transaction"))?;

        let payment_ref = transaction
            .payment_method_id
            .clone()
            .ok_or_else(|| DomainError::InvalidInput("transaction has no payment ref".into()))?;

        let status = self
            .provider
            .charge_status(&payment_ref)
            .await
            .map_err(|e| DomainError::ExternalUnavailable(e.to_string()))?;

        if status != PixStatus::Approved {
            return Ok(PollOutcome {
                status,
                approved: false,
                first_settle: false,
                code: None,
                subscription: None,
            });
        }

        let PurchaseOutcome {
            first_settle,
            code,
            subscription,
            ..
        } = self
            .store
            .complete_purchase(transaction_id, self.grant_days)
            .await?;

        if first_settle {
            info!(transaction_id, "Payment approved and settled");
        }
        if code.is_none() {
            warn!(transaction_id, "No redeem code available for settled payment");
        }

        Ok(PollOutcome {
            status,
            approved: true,
            first_settle,
            code,
            subscription,
        })
    }

    /// Idempotent code binding for a paid transaction.
    pub async fn issue_redeem_code(&self, transaction_id: i64) -> Result<RedeemCode, DomainError> {
        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or(DomainError::NotFound("transaction"))?;

        if !transaction.is_paid() {
            return Err(DomainError::Conflict(format!(
                "transaction {} is not paid",
                transaction_id
            )));
        }

        self.store
            .issue_code_for_transaction(transaction_id)
            .await?
            .ok_or_else(|| DomainError::Conflict("no redeem code available".into()))
    }

    /// One-time redemption. Claim, transaction binding and subscription
    /// activation commit together in the store, so a losing or failed
    /// attempt never leaves a half-consumed code behind.
    pub async fn redeem(&self, code: &str, phone: &str) -> Result<RedeemOutcome, DomainError> {
        let user = self
            .store
            .get_or_create_user(&normalize_phone(phone))
            .await?;

        let claim = self
            .store
            .redeem_code_for_user(code.trim(), user.id, self.grant_days)
            .await?
            .ok_or_else(|| DomainError::Conflict("code invalid or already used".into()))?;

        let product = match claim.code.product_id {
            Some(product_id) => self.store.get_product(product_id).await?,
            None => None,
        };

        info!(code_id = claim.code.id, user_id = user.id, "Redeem code claimed");

        Ok(RedeemOutcome {
            code: claim.code,
            product,
            subscription: claim.subscription,
        })
    }
}
