//! End-to-end request flow through the gateway.

use axum::http::StatusCode;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

mod common;

use common::{client, config, start_counting_backend, start_gateway, start_programmable_backend, token, SECRET};

#[tokio::test]
async fn test_health() {
    let (backend, _) = start_counting_backend(200, "ok").await;
    let gw = start_gateway(config(backend, backend, backend)).await;

    let res = client().get(gw.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-request-id").is_some());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "status": "healthy", "service": "api-gateway" }));

    gw.shutdown.trigger();
}

#[tokio::test]
async fn test_options_answered_without_backend() {
    let (backend, hits) = start_counting_backend(200, "should not be reached").await;
    let gw = start_gateway(config(backend, backend, backend)).await;

    let res = client()
        .request(reqwest::Method::OPTIONS, gw.url("/api/v1/data/x"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    gw.shutdown.trigger();
}

#[tokio::test]
async fn test_rate_limit_101st_request() {
    let (backend, hits) = start_counting_backend(200, "processed").await;
    let gw = start_gateway(config(backend, backend, backend)).await;
    let client = client();

    for i in 0..100 {
        let res = client.get(gw.url("/api/v1/process/run")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK, "request {} should pass", i + 1);
    }

    let res = client.get(gw.url("/api/v1/process/run")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        res.text().await.unwrap(),
        r#"{"error":"rate limit exceeded","message":"too many requests"}"#
    );
    assert_eq!(hits.load(Ordering::SeqCst), 100);

    gw.shutdown.trigger();
}

#[tokio::test]
async fn test_breaker_opens_after_three_server_errors() {
    let (auth_backend, hits) = start_counting_backend(500, "boom").await;
    let (other, _) = start_counting_backend(200, "ok").await;
    let gw = start_gateway(config(auth_backend, other, other)).await;
    let client = client();

    for _ in 0..3 {
        let res = client.post(gw.url("/api/v1/auth/login")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.text().await.unwrap(), "boom");
    }

    let res = client.post(gw.url("/api/v1/auth/login")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        res.text().await.unwrap(),
        r#"{"error":"service unavailable","message":"circuit breaker is open"}"#
    );
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    // Other services keep their own breaker.
    let res = client.get(gw.url("/api/v1/process/run")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gw.shutdown.trigger();
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let data_backend = start_programmable_backend(move |request| {
        record.lock().unwrap().push(request);
        async { (200, "housing".to_string()) }
    })
    .await;
    let (other, _) = start_counting_backend(200, "ok").await;
    let gw = start_gateway(config(other, data_backend, other)).await;
    let client = client();

    let res = client.get(gw.url("/api/v1/data/housing")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        res.text().await.unwrap(),
        r#"{"error":"unauthorized","message":"missing authorization header"}"#
    );

    let res = client
        .get(gw.url("/api/v1/data/housing"))
        .header("Authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        res.text().await.unwrap(),
        r#"{"error":"unauthorized","message":"invalid authorization header format"}"#
    );

    let res = client
        .get(gw.url("/api/v1/data/housing"))
        .bearer_auth(token("wrong-secret", 1, 600))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gw.url("/api/v1/data/housing"))
        .bearer_auth(token(SECRET, 1, -3600))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.text().await.unwrap().contains("expired"));

    assert!(seen.lock().unwrap().is_empty());

    let valid = token(SECRET, 42, 600);
    let res = client
        .get(gw.url("/api/v1/data/housing?page=2"))
        .bearer_auth(&valid)
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-request-id").unwrap(), "req-42");
    assert_eq!(res.text().await.unwrap(), "housing");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let forwarded = &seen[0];
    assert_eq!(forwarded.method, "GET");
    assert_eq!(forwarded.target, "/api/v1/data/housing?page=2");
    assert_eq!(forwarded.header("authorization"), Some(format!("Bearer {}", valid)));
    assert_eq!(forwarded.header("x-request-id").as_deref(), Some("req-42"));
    assert_eq!(forwarded.header("x-forwarded-for").as_deref(), Some("127.0.0.1"));
    assert_eq!(forwarded.header("x-forwarded-proto").as_deref(), Some("http"));
    assert_eq!(
        forwarded.header("host"),
        Some(data_backend.to_string())
    );

    gw.shutdown.trigger();
}

#[tokio::test]
async fn test_round_robin_across_endpoints() {
    let (first, first_hits) = start_counting_backend(200, "a").await;
    let (second, second_hits) = start_counting_backend(200, "b").await;

    let mut cfg = config(first, first, first);
    for service in &mut cfg.services {
        if service.name == "python-processor" {
            service.endpoints = vec![format!("http://{}", first), format!("http://{}", second)];
        }
    }
    let gw = start_gateway(cfg).await;
    let client = client();

    let mut bodies = Vec::new();
    for _ in 0..6 {
        let res = client.get(gw.url("/api/v1/process/run")).send().await.unwrap();
        bodies.push(res.text().await.unwrap());
    }

    assert_eq!(bodies, vec!["a", "b", "a", "b", "a", "b"]);
    assert_eq!(first_hits.load(Ordering::SeqCst), 3);
    assert_eq!(second_hits.load(Ordering::SeqCst), 3);

    gw.shutdown.trigger();
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let (backend, hits) = start_counting_backend(200, "ok").await;
    let gw = start_gateway(config(backend, backend, backend)).await;

    let res = client().get(gw.url("/api/v1/unknown")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        res.text().await.unwrap(),
        r#"{"error":"not found","message":"no route for /api/v1/unknown"}"#
    );

    // Prefixes match on segment boundaries.
    let res = client().get(gw.url("/api/v1/authx")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    gw.shutdown.trigger();
}
