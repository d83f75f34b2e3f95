use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};
use zapvendas_db::utils::{normalize_phone, to_send_jid};

use crate::engine::store::EngineStore;
use crate::gateway::MessageSender;

/// How soon before expiry a subscription counts as "expiring soon".
const EXPIRING_SOON_DAYS: i64 = 5;
/// How far back an expired subscription is still reported.
const EXPIRED_LOOKBACK_DAYS: i64 = 15;
/// Reminder window before expiry.
const REMINDER_DAYS: i64 = 3;

#[derive(Debug, Clone)]
pub enum SubscriptionStatus {
    Active {
        product_name: String,
        days_left: i64,
        expiring_soon: bool,
        expiry_date: chrono::DateTime<Utc>,
    },
    RecentlyExpired {
        product_name: String,
        days_since: i64,
    },
    None,
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn EngineStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Status lookup by phone. The substring user match is intentionally
    /// kept lossy, see UserRepository::find_by_number_fragment.
    pub async fn status_for_phone(&self, phone: &str) -> Result<SubscriptionStatus> {
        let digits = normalize_phone(phone);
        let user = match self.store.find_user_by_number_fragment(&digits).await? {
            Some(user) => user,
            None => return Ok(SubscriptionStatus::None),
        };
        self.status_for_user(user.id).await
    }

    pub async fn status_for_user(&self, user_id: i64) -> Result<SubscriptionStatus> {
        let now = Utc::now();

        // Nearest expiry first.
        if let Some(sub) = self.store.active_subscriptions(user_id).await?.into_iter().next() {
            let product_name = self.product_name(sub.product_id).await?;
            let days_left = (sub.expiry_date - now).num_days().max(0);
            return Ok(SubscriptionStatus::Active {
                product_name,
                days_left,
                expiring_soon: days_left <= EXPIRING_SOON_DAYS,
                expiry_date: sub.expiry_date,
            });
        }

        if let Some(sub) = self
            .store
            .recently_expired_subscription(user_id, EXPIRED_LOOKBACK_DAYS)
            .await?
        {
            let product_name = self.product_name(sub.product_id).await?;
            let days_since = (now - sub.expiry_date).num_days().max(0);
            return Ok(SubscriptionStatus::RecentlyExpired {
                product_name,
                days_since,
            });
        }

        Ok(SubscriptionStatus::None)
    }

    pub async fn status_message_for_phone(&self, phone: &str) -> Result<String> {
        Ok(format_status(&self.status_for_phone(phone).await?))
    }

    async fn product_name(&self, product_id: i64) -> Result<String> {
        Ok(self
            .store
            .get_product(product_id)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| "assinatura".to_string()))
    }

    /// Flips overdue subscriptions to expired and sends renewal reminders
    /// for the ones about to expire, at most once a day each.
    pub async fn run_sweep(&self, sender: &Arc<dyn MessageSender>) -> Result<()> {
        let expired = self.store.expire_overdue_subscriptions().await?;
        if expired > 0 {
            info!(expired, "Expired overdue subscriptions");
        }

        for sub in self
            .store
            .subscriptions_due_for_reminder(REMINDER_DAYS)
            .await?
        {
            let user = match self.store.get_user(sub.user_id).await? {
                Some(user) => user,
                None => continue,
            };
            let product_name = self.product_name(sub.product_id).await?;
            let days_left = (sub.expiry_date - Utc::now()).num_days().max(0);
            let message = format!(
                "⏰ Sua assinatura de *{}* expira em {} dia(s), em {}.\nEnvie *renovar* para mantê-la ativa.",
                product_name,
                days_left,
                sub.expiry_date.format("%d/%m/%Y")
            );
            sender
                .send_text(&to_send_jid(&user.whatsapp_number), &message)
                .await?;
            self.store.mark_reminder_sent(sub.id).await?;
        }
        Ok(())
    }

    pub fn spawn_sweeper(&self, sender: Arc<dyn MessageSender>, interval: Duration) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = service.run_sweep(&sender).await {
                    error!(error = %err, "Subscription sweep failed");
                }
            }
        });
    }
}

pub fn format_status(status: &SubscriptionStatus) -> String {
    match status {
        SubscriptionStatus::Active {
            product_name,
            days_left,
            expiring_soon,
            expiry_date,
        } => {
            let mut out = format!(
                "📋 *Status da assinatura*\n\nPlano: {}\nVálida até: {}\nDias restantes: {}",
                product_name,
                expiry_date.format("%d/%m/%Y"),
                days_left
            );
            if *expiring_soon {
                out.push_str("\n\n⚠️ Sua assinatura expira em breve! Envie *renovar* para renová-la.");
            }
            out
        }
        SubscriptionStatus::RecentlyExpired {
            product_name,
            days_since,
        } => format!(
            "Sua assinatura de *{}* expirou há {} dia(s).\nEnvie *renovar* para reativá-la.",
            product_name, days_since
        ),
        SubscriptionStatus::None => {
            "Você ainda não possui uma assinatura.\nEnvie *comprar* para conhecer nossos planos."
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_status_mentions_days_and_warning() {
        let status = SubscriptionStatus::Active {
            product_name: "Plano Mensal".into(),
            days_left: 3,
            expiring_soon: true,
            expiry_date: Utc::now(),
        };
        let message = format_status(&status);
        assert!(message.contains("Plano Mensal"));
        assert!(message.contains("Dias restantes: 3"));
        assert!(message.contains("expira em breve"));
    }

    #[test]
    fn comfortable_expiry_has_no_warning() {
        let status = SubscriptionStatus::Active {
            product_name: "Plano Mensal".into(),
            days_left: 20,
            expiring_soon: false,
            expiry_date: Utc::now(),
        };
        assert!(!format_status(&status).contains("expira em breve"));
    }

    #[test]
    fn expired_and_none_messages() {
        let expired = SubscriptionStatus::RecentlyExpired {
            product_name: "Plano Mensal".into(),
            days_since: 4,
        };
        assert!(format_status(&expired).contains("expirou há 4 dia(s)"));
        assert!(format_status(&SubscriptionStatus::None).contains("*comprar*"));
    }
}
