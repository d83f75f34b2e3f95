mod support;

use std::sync::Arc;
use std::time::Duration;

use support::harness;
use zapvendas_bot::engine::store::EngineStore;
use zapvendas_bot::gateway::MessageSender;
use zapvendas_bot::services::broadcast::BroadcastService;
use zapvendas_bot::services::subscriptions::{SubscriptionService, SubscriptionStatus};

#[tokio::test]
async fn broadcast_counts_each_recipient() {
    let h = harness();
    let sender: Arc<dyn MessageSender> = h.sender.clone();
    let service = BroadcastService::new(sender, Duration::ZERO, 2, Duration::ZERO);

    let recipients = vec![
        "5511999990001".to_string(),
        "5511999990002".to_string(),
        "5511999990003".to_string(),
    ];
    let report = service.send_to_all(&recipients, "Promoção de hoje!").await;

    assert_eq!(report.sent, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(h.sender.texts().len(), 3);
}

#[tokio::test]
async fn sweep_expires_overdue_and_reminds_once() {
    let h = harness();
    let product = h.store.add_product("Plano Mensal", 29.9, true);
    let overdue_user = h.store.get_or_create_user("5511999990001").await.unwrap();
    let soon_user = h.store.get_or_create_user("5511999990002").await.unwrap();
    h.store.add_subscription(overdue_user.id, product, -1);
    h.store.add_subscription(soon_user.id, product, 2);

    let store: Arc<dyn EngineStore> = h.store.clone();
    let sender: Arc<dyn MessageSender> = h.sender.clone();
    let service = SubscriptionService::new(store);

    service.run_sweep(&sender).await.unwrap();

    // Overdue subscription was flipped before the reminder pass ran.
    let overdue = h.store.subscriptions_for(overdue_user.id);
    assert_eq!(overdue[0].status, "expired");

    let texts = h.sender.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("expira em"));

    // A second sweep inside the same day stays quiet.
    h.sender.clear();
    service.run_sweep(&sender).await.unwrap();
    assert!(h.sender.texts().is_empty());
}

#[tokio::test]
async fn status_by_phone_uses_fragment_lookup() {
    let h = harness();
    let product = h.store.add_product("Plano Mensal", 29.9, true);
    let user = h.store.get_or_create_user("5511999999999").await.unwrap();
    h.store.add_subscription(user.id, product, 10);

    let store: Arc<dyn EngineStore> = h.store.clone();
    let service = SubscriptionService::new(store);

    let status = service
        .status_for_phone("5511999999999@c.us")
        .await
        .unwrap();
    match status {
        SubscriptionStatus::Active {
            product_name,
            days_left,
            expiring_soon,
            ..
        } => {
            assert_eq!(product_name, "Plano Mensal");
            assert!((9..=10).contains(&days_left));
            assert!(!expiring_soon);
        }
        other => panic!("expected active status, got {:?}", other),
    }
}

#[tokio::test]
async fn recently_expired_subscription_reports_days_since() {
    let h = harness();
    let product = h.store.add_product("Plano Mensal", 29.9, true);
    let user = h.store.get_or_create_user("5511999990001").await.unwrap();
    h.store.add_expired_subscription(user.id, product, 8);

    let store: Arc<dyn EngineStore> = h.store.clone();
    let service = SubscriptionService::new(store);

    match service.status_for_user(user.id).await.unwrap() {
        SubscriptionStatus::RecentlyExpired {
            product_name,
            days_since,
        } => {
            assert_eq!(product_name, "Plano Mensal");
            assert_eq!(days_since, 8);
        }
        other => panic!("expected recently expired status, got {:?}", other),
    }
}

#[tokio::test]
async fn long_expired_subscription_is_not_reported() {
    let h = harness();
    let product = h.store.add_product("Plano Mensal", 29.9, true);
    let user = h.store.get_or_create_user("5511999990001").await.unwrap();
    // Past the 15-day lookback window.
    h.store.add_expired_subscription(user.id, product, 20);

    let store: Arc<dyn EngineStore> = h.store.clone();
    let service = SubscriptionService::new(store);

    let status = service.status_for_user(user.id).await.unwrap();
    assert!(matches!(status, SubscriptionStatus::None));
}
