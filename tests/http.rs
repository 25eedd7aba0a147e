//! Router-level tests: control paths, token validation, forwarding.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use rand::rngs::OsRng;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use blitz::http::{router, Blitz, Downstream, QUEUE_HEADER, RESERVATION_HEADER};

/// A request as observed by the downstream stub.
#[derive(Debug, Clone)]
struct SeenRequest {
    path: String,
    has_control_headers: bool,
}

/// Downstream stub that records what reaches it.
struct RecordingDownstream {
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

#[async_trait]
impl Downstream for RecordingDownstream {
    async fn forward(&self, req: Request) -> Response {
        let has_control_headers = req.headers().contains_key(RESERVATION_HEADER)
            || req.headers().contains_key(QUEUE_HEADER);
        self.seen.lock().unwrap().push(SeenRequest {
            path: req.uri().path().to_string(),
            has_control_headers,
        });
        Response::new(Body::from("upstream response"))
    }
}

fn test_app(
    bursts: &[u64],
    every: Duration,
) -> (Router, Arc<Mutex<Vec<SeenRequest>>>, watch::Sender<bool>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let downstream = RecordingDownstream { seen: seen.clone() };
    let engine = Arc::new(Blitz::new(&mut OsRng, downstream, every, bursts).unwrap());
    let (tx, rx) = watch::channel(false);
    (router(engine, rx), seen, tx)
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

#[tokio::test]
async fn test_status_baseline() {
    let (app, _, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/blitz/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, serde_json::json!({"Slots": [5], "Delays": [0]}));
}

#[tokio::test]
async fn test_other_methods_on_control_path_are_rejected() {
    let (app, _, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/blitz/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_mint_reservation() {
    let (app, _, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/blitz/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["Success"], true);
    assert_eq!(json["Queue"], 0);
    assert_eq!(json["DelayInMilliseconds"], 0);
    assert!(!json["X-Blitz-Reservation"].as_str().unwrap().is_empty());

    let from = json["TokenValidFromUnixMilliseconds"].as_i64().unwrap();
    let until = json["TokenValidUntilUnixMilliseconds"].as_i64().unwrap();
    assert_eq!(until - from, 1000);
}

#[tokio::test]
async fn test_mint_honors_queue_header_and_downgrades() {
    let (app, _, _tx) = test_app(&[1, 1], Duration::from_secs(1));

    let mint = |app: Router| async move {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/blitz/")
                    .header(QUEUE_HEADER, "1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        body_json(response).await
    };

    let first = mint(app.clone()).await;
    assert_eq!(first["Queue"], 1);

    // Queue 1 is drained, queue 0 still has a free token and wins.
    let second = mint(app).await;
    assert_eq!(second["Success"], true);
    assert_eq!(second["Queue"], 0);
}

#[tokio::test]
async fn test_mint_then_use_forwards_downstream() {
    let (app, seen, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/blitz/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let token = json["X-Blitz-Reservation"].as_str().unwrap().to_owned();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/data?x=1")
                .header(RESERVATION_HEADER, token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "upstream response");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, "/api/data");
    assert!(!seen[0].has_control_headers);
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let (app, seen, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/data")
                .header(RESERVATION_HEADER, "garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("invalid format"), "body: {body}");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_utf8_token_is_rejected_not_admitted() {
    let (app, seen, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/data")
                .header(
                    RESERVATION_HEADER,
                    HeaderValue::from_bytes(b"\xc3\x28\xff").unwrap(),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // The header is present, so the request takes the reservation path and
    // fails validation instead of being admitted transparently.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("invalid format"), "body: {body}");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let (app, seen, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/blitz/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let token = json["X-Blitz-Reservation"].as_str().unwrap();

    let mut chars: Vec<char> = token.chars().collect();
    let i = chars.len() / 2;
    chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
    let tampered: String = chars.into_iter().collect();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/data")
                .header(RESERVATION_HEADER, tampered)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("invalid"), "body: {body}");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_token_reports_both_timestamps() {
    let (app, seen, _tx) = test_app(&[5], Duration::from_millis(50));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/blitz/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    let token = json["X-Blitz-Reservation"].as_str().unwrap().to_owned();
    let from = json["TokenValidFromUnixMilliseconds"].as_i64().unwrap();
    let until = json["TokenValidUntilUnixMilliseconds"].as_i64().unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/data")
                .header(RESERVATION_HEADER, token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("expired"), "body: {body}");
    assert!(body.contains(&from.to_string()), "body: {body}");
    assert!(body.contains(&until.to_string()), "body: {body}");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_transparent_request_forwards_and_scrubs_headers() {
    let (app, seen, _tx) = test_app(&[5], Duration::from_secs(1));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/work")
                .header(QUEUE_HEADER, "0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, "/work");
    assert!(!seen[0].has_control_headers);
}

#[tokio::test]
async fn test_shutdown_cancels_held_transparent_request() {
    let (app, seen, tx) = test_app(&[1], Duration::from_secs(5));

    // Drain the only token so the next request has to wait.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/first")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let held = {
        let app = app.clone();
        tokio::spawn(async move {
            app.oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/second")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    let response = held.await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_string(response).await, "Request cancelled by client");

    // Only the first request ever reached the downstream.
    assert_eq!(seen.lock().unwrap().len(), 1);
}
