use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zapvendas_bot::engine::pg::PgStore;
use zapvendas_bot::engine::store::EngineStore;
use zapvendas_bot::engine::FlowEngine;
use zapvendas_bot::gateway::{BridgeGateway, MessageSender, RetryPolicy, StatusCache};
use zapvendas_bot::routes;
use zapvendas_bot::services::broadcast::BroadcastService;
use zapvendas_bot::services::payment::{MercadoPix, PaymentCoordinator};
use zapvendas_bot::services::subscriptions::SubscriptionService;
use zapvendas_bot::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("zapvendas_bot=info,zapvendas_db=info")),
        )
        .init();

    info!("Starting zapvendas bot...");

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let bridge_url =
        env::var("WHATSAPP_SERVICE_URL").unwrap_or_else(|_| "http://localhost:3333".to_string());
    let pix_base_url =
        env::var("PIX_BASE_URL").unwrap_or_else(|_| "https://api.mercadopago.com".to_string());
    let pix_token = env::var("PIX_ACCESS_TOKEN").context("PIX_ACCESS_TOKEN is not set")?;
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let pool = zapvendas_db::connect(&database_url).await?;
    let store: Arc<dyn EngineStore> = Arc::new(PgStore::new(pool));

    let gateway = Arc::new(BridgeGateway::new(
        bridge_url,
        StatusCache::new(Duration::from_secs(60)),
        RetryPolicy::bridge_default(),
    )?);
    gateway.spawn_heartbeat(Duration::from_secs(30));
    let sender: Arc<dyn MessageSender> = gateway;

    let provider = Arc::new(MercadoPix::new(pix_base_url, pix_token)?);
    let payments = PaymentCoordinator::new(store.clone(), provider, 30);

    let engine = FlowEngine::new(store.clone(), sender.clone(), payments);

    let subscriptions = SubscriptionService::new(store.clone());
    subscriptions.spawn_sweeper(sender.clone(), Duration::from_secs(3600));

    let broadcast = BroadcastService::new(
        sender.clone(),
        Duration::from_secs(2),
        20,
        Duration::from_secs(30),
    );

    let state = AppState {
        engine,
        broadcast,
        store,
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "Webhook server listening");
    axum::serve(listener, routes::router(state))
        .await
        .context("Server error")?;
    Ok(())
}
