use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(inbound_webhook))
        .route("/payments/webhook", post(payment_webhook))
        .route("/broadcast", post(broadcast))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Option<InboundMessage>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    from: String,
    #[serde(default)]
    body: String,
}

#[derive(Serialize)]
struct WebhookReply {
    success: bool,
    message: String,
}

impl WebhookReply {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
        })
    }
}

async fn inbound_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<WebhookReply> {
    if payload.kind != "message" {
        return WebhookReply::ok("ignored");
    }
    let message = match payload.message {
        Some(message) => message,
        None => return WebhookReply::ok("ignored"),
    };

    // Processing happens off the request path; per-user ordering is the
    // engine's concern.
    let engine = state.engine.clone();
    tokio::spawn(async move {
        engine.handle_message(&message.from, &message.body).await;
    });

    WebhookReply::ok("queued")
}

#[derive(Debug, Deserialize)]
struct GatewayNotification {
    #[serde(default)]
    action: String,
    #[serde(default)]
    data: NotificationData,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationData {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

async fn payment_webhook(
    State(state): State<AppState>,
    Json(notification): Json<GatewayNotification>,
) -> Json<WebhookReply> {
    if !notification.action.contains("payment") {
        return WebhookReply::ok("ignored");
    }
    let payment_ref = match notification.data.id {
        Some(serde_json::Value::String(id)) => id,
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => {
            debug!("Payment notification without an id");
            return WebhookReply::ok("ignored");
        }
    };

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(err) = engine.handle_payment_notification(&payment_ref).await {
            error!(payment_ref = %payment_ref, error = %err, "Payment notification failed");
        }
    });

    WebhookReply::ok("queued")
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    message: String,
}

#[derive(Serialize)]
struct BroadcastReply {
    success: bool,
    sent: usize,
    failed: usize,
}

/// Paced mass message to every registered user. Runs on the request so the
/// caller gets the per-recipient tally back.
async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Json<BroadcastReply> {
    if request.message.trim().is_empty() {
        return Json(BroadcastReply {
            success: false,
            sent: 0,
            failed: 0,
        });
    }

    let numbers = match state.store.all_user_numbers().await {
        Ok(numbers) => numbers,
        Err(err) => {
            error!(error = %err, "Failed to load broadcast recipients");
            return Json(BroadcastReply {
                success: false,
                sent: 0,
                failed: 0,
            });
        }
    };

    let report = state.broadcast.send_to_all(&numbers, &request.message).await;
    Json(BroadcastReply {
        success: true,
        sent: report.sent,
        failed: report.failed,
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
