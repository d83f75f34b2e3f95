use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

pub mod retry;
pub mod whatsapp;

pub use retry::RetryPolicy;
pub use whatsapp::{BridgeGateway, StatusCache};

/// Outbound seam for the engine and services. The production implementation
/// is [`BridgeGateway`]; tests use a recording fake.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    async fn send_image(&self, to: &str, path: &Path, caption: Option<&str>) -> Result<()>;

    /// Whether the contact's stored name contains the configured keyword.
    /// Implementations without contact access answer false.
    async fn check_keyword(&self, _number: &str, _keyword: &str) -> Result<bool> {
        Ok(false)
    }

    /// Whether the number is a saved contact. None means unknown, which the
    /// reply-policy gate treats as allowed.
    async fn contact_is_saved(&self, _number: &str) -> Result<Option<bool>> {
        Ok(None)
    }
}
