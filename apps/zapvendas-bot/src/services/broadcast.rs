use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use zapvendas_db::utils::to_send_jid;

use crate::gateway::MessageSender;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Paced batch sender. The delays are a cooperative throttle against the
/// bridge's outbound rate limits, not a delivery guarantee.
#[derive(Clone)]
pub struct BroadcastService {
    sender: Arc<dyn MessageSender>,
    message_delay: Duration,
    batch_size: usize,
    batch_pause: Duration,
}

impl BroadcastService {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        message_delay: Duration,
        batch_size: usize,
        batch_pause: Duration,
    ) -> Self {
        Self {
            sender,
            message_delay,
            batch_size: batch_size.max(1),
            batch_pause,
        }
    }

    pub async fn send_to_all(&self, recipients: &[String], text: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (idx, recipient) in recipients.iter().enumerate() {
            if idx > 0 {
                if idx % self.batch_size == 0 {
                    tokio::time::sleep(self.batch_pause).await;
                } else {
                    tokio::time::sleep(self.message_delay).await;
                }
            }
            match self.sender.send_text(&to_send_jid(recipient), text).await {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    warn!(recipient = %recipient, error = %err, "Broadcast send failed");
                    report.failed += 1;
                }
            }
        }
        info!(sent = report.sent, failed = report.failed, "Broadcast finished");
        report
    }
}
