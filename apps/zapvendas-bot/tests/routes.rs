mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use support::{harness, Harness};
use tower::ServiceExt;
use zapvendas_bot::engine::store::EngineStore;
use zapvendas_bot::gateway::MessageSender;
use zapvendas_bot::routes;
use zapvendas_bot::services::broadcast::BroadcastService;
use zapvendas_bot::state::AppState;

fn app(h: &Harness) -> axum::Router {
    let sender: Arc<dyn MessageSender> = h.sender.clone();
    let store: Arc<dyn EngineStore> = h.store.clone();
    let broadcast = BroadcastService::new(sender, Duration::ZERO, 50, Duration::ZERO);
    routes::router(AppState {
        engine: h.engine.clone(),
        broadcast,
        store,
    })
}

#[tokio::test]
async fn health_answers_ok() {
    let h = harness();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn broadcast_route_reaches_every_user() {
    let h = harness();
    h.store.get_or_create_user("5511999990001").await.unwrap();
    h.store.get_or_create_user("5511999990002").await.unwrap();

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/broadcast")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"message":"Promoção de hoje!"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let texts = h.sender.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts.iter().all(|t| t == "Promoção de hoje!"));
}

#[tokio::test]
async fn blank_broadcast_sends_nothing() {
    let h = harness();
    h.store.get_or_create_user("5511999990001").await.unwrap();

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/broadcast")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"message":"   "}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.sender.texts().is_empty());
}
