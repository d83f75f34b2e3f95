use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::json;

use crate::services::payment::{PixCharge, PixProvider, PixStatus};

/// Mercado Pago-style PIX gateway client.
pub struct MercadoPix {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl MercadoPix {
    pub fn new(base_url: String, access_token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build PIX HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            client,
        })
    }

    fn map_status(raw: &str) -> PixStatus {
        match raw {
            "approved" => PixStatus::Approved,
            "pending" | "in_process" | "authorized" => PixStatus::Pending,
            "rejected" => PixStatus::Rejected,
            "cancelled" | "refunded" | "charged_back" => PixStatus::Cancelled,
            _ => PixStatus::Unknown,
        }
    }
}

#[async_trait]
impl PixProvider for MercadoPix {
    async fn create_charge(
        &self,
        amount: f64,
        description: &str,
        payer_email: &str,
    ) -> Result<PixCharge> {
        let body = json!({
            "transaction_amount": amount,
            "description": description,
            "payment_method_id": "pix",
            "payer": { "email": payer_email },
        });

        let resp = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .context("PIX gateway unreachable")?;

        let status = resp.status();
        let payload: serde_json::Value =
            resp.json().await.context("Malformed PIX gateway response")?;
        if !status.is_success() {
            return Err(anyhow!("PIX gateway error ({}): {}", status, payload));
        }

        let payment_ref = payload
            .get("id")
            .map(|id| id.to_string().trim_matches('"').to_string())
            .ok_or_else(|| anyhow!("PIX response missing payment id"))?;

        let code_payload = payload
            .pointer("/point_of_interaction/transaction_data/qr_code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("PIX response missing QR payload"))?
            .to_string();

        let expires_at = payload
            .get("date_of_expiration")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.to_utc());

        Ok(PixCharge {
            payment_ref,
            code_payload,
            expires_at,
        })
    }

    async fn charge_status(&self, payment_ref: &str) -> Result<PixStatus> {
        let resp = self
            .client
            .get(format!("{}/v1/payments/{}", self.base_url, payment_ref))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("PIX gateway unreachable")?;

        let status = resp.status();
        let payload: serde_json::Value =
            resp.json().await.context("Malformed PIX gateway response")?;
        if !status.is_success() {
            return Err(anyhow!("PIX gateway error ({}): {}", status, payload));
        }

        Ok(payload
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_status)
            .unwrap_or(PixStatus::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(MercadoPix::map_status("approved"), PixStatus::Approved);
        assert_eq!(MercadoPix::map_status("pending"), PixStatus::Pending);
        assert_eq!(MercadoPix::map_status("in_process"), PixStatus::Pending);
        assert_eq!(MercadoPix::map_status("rejected"), PixStatus::Rejected);
        assert_eq!(MercadoPix::map_status("weird"), PixStatus::Unknown);
    }
}
