mod common;

use common::*;
use orepublish::{OreError, SessionRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::{MockServer, ResponseTemplate};

fn registry() -> SessionRegistry {
    SessionRegistry::new(fast_transport(), SESSION_DURATION)
}

#[tokio::test]
async fn test_one_session_per_endpoint() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    authenticate()
        .respond_with(grants("A"))
        .expect(1)
        .mount(&first)
        .await;
    authenticate()
        .respond_with(grants("B"))
        .expect(1)
        .mount(&second)
        .await;

    let registry = registry();
    let a1 = registry.session(&api_key(), &first.uri()).await.unwrap();
    let a2 = registry.session(&api_key(), &first.uri()).await.unwrap();
    let b = registry.session(&api_key(), &second.uri()).await.unwrap();

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b));
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_concurrent_first_use_connects_once() {
    let server = MockServer::start().await;
    authenticate()
        .respond_with(grants("T1").set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry();
    let endpoint = server.uri();
    let key = api_key();
    let (first, second, third) = tokio::join!(
        registry.session(&key, &endpoint),
        registry.session(&key, &endpoint),
        registry.session(&key, &endpoint),
    );

    let first = first.unwrap();
    assert!(Arc::ptr_eq(&first, &second.unwrap()));
    assert!(Arc::ptr_eq(&first, &third.unwrap()));
}

#[tokio::test]
async fn test_failed_connect_is_not_cached() {
    let server = MockServer::start().await;
    authenticate()
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    authenticate()
        .respond_with(grants("T1"))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry();
    let error = registry
        .session(&api_key(), &server.uri())
        .await
        .unwrap_err();
    assert!(matches!(error.root(), OreError::AuthError(_)));
    assert!(registry.is_empty());

    let session = registry.session(&api_key(), &server.uri()).await.unwrap();
    assert!(session.is_authenticated());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_session_with_failed_renewal_is_replaced() {
    let server = MockServer::start().await;
    authenticate()
        .respond_with(grants("T1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    authenticate()
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    authenticate()
        .respond_with(grants("T2"))
        .expect(1)
        .mount(&server)
        .await;
    signed("GET", "permissions", "T1")
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    signed("GET", "permissions", "T2")
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"type": "global", "permissions": []})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let registry = registry();
    let broken = registry.session(&api_key(), &server.uri()).await.unwrap();
    let error = broken.global_permissions().await.unwrap_err();
    assert!(matches!(error.root(), OreError::AuthError(_)));
    assert!(broken.is_broken());
    assert!(registry.is_empty());

    let renewed = registry.session(&api_key(), &server.uri()).await.unwrap();
    assert!(!Arc::ptr_eq(&broken, &renewed));
    renewed.global_permissions().await.unwrap();

    let cached = registry.session(&api_key(), &server.uri()).await.unwrap();
    assert!(Arc::ptr_eq(&renewed, &cached));
    cached.global_permissions().await.unwrap();
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_terminated_session_is_replaced() {
    let server = MockServer::start().await;
    authenticate()
        .respond_with(grants("T1"))
        .expect(2)
        .mount(&server)
        .await;
    signed("DELETE", "sessions/current", "T1")
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry();
    let first = registry.session(&api_key(), &server.uri()).await.unwrap();
    first.terminate().await.unwrap();

    let second = registry.session(&api_key(), &server.uri()).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_authenticated());
}

#[tokio::test]
async fn test_shutdown_terminates_every_session() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    for (server, token) in [(&first, "A"), (&second, "B")] {
        mount_authentication(server, token).await;
        signed("DELETE", "sessions/current", token)
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
    }

    let registry = registry();
    let a = registry.session(&api_key(), &first.uri()).await.unwrap();
    let b = registry.session(&api_key(), &second.uri()).await.unwrap();

    registry.shutdown(Duration::from_secs(5)).await;

    assert!(registry.is_empty());
    assert!(registry.transport().is_closed());
    assert!(!a.is_authenticated());
    assert!(!b.is_authenticated());

    let error = a.global_permissions().await.unwrap_err();
    assert!(matches!(error.root(), OreError::AuthError(_)));
}

#[tokio::test]
async fn test_slow_termination_is_abandoned() {
    let server = MockServer::start().await;
    mount_authentication(&server, "T1").await;
    signed("DELETE", "sessions/current", "T1")
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let registry = registry();
    registry.session(&api_key(), &server.uri()).await.unwrap();

    let started = Instant::now();
    registry.shutdown(Duration::from_millis(200)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(registry.is_empty());
    assert!(registry.transport().is_closed());
}

#[tokio::test]
async fn test_closed_transport_refuses_new_sessions() {
    let server = MockServer::start().await;
    mount_authentication(&server, "T1").await;

    let registry = registry();
    registry.shutdown(Duration::from_secs(1)).await;

    let error = registry
        .session(&api_key(), &server.uri())
        .await
        .unwrap_err();
    assert!(matches!(error.root(), OreError::NetworkError(_)));
}
