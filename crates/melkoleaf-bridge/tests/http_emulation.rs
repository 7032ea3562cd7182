//! Integration tests for the emulated panel API.
//!
//! # Purpose
//!
//! These tests drive the axum router in-process with
//! `tower::ServiceExt::oneshot`, the same way a controller would talk to the
//! bridge over HTTP.  They verify:
//!
//! - Pairing: `/api/v1/new` hands out the token and that token opens every
//!   protected route.
//! - Unauthorized requests get 401 and leave bridge state untouched.
//! - The effects endpoint: stream handoff for both protocol versions, static
//!   colors reaching the frame queue, and malformed bodies rejected.
//! - The fallback keeps controllers from treating unknown API paths as
//!   "not a panel".

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use melkoleaf_bridge::application::context::BridgeContext;
use melkoleaf_bridge::domain::auth::AuthToken;
use melkoleaf_bridge::domain::config::BridgeConfig;
use melkoleaf_bridge::infrastructure::ble::mock::MockTransport;
use melkoleaf_bridge::infrastructure::emulation::{router, EmulationState};
use melkoleaf_core::Rgb;

const TOKEN: &str = "test-token";

fn bridge() -> (Router, BridgeContext) {
    let ctx = BridgeContext::new(
        Arc::new(BridgeConfig::default()),
        Arc::new(MockTransport::new()),
    );
    let state = EmulationState {
        ctx: ctx.clone(),
        token: AuthToken::from_configured(TOKEN).unwrap(),
        stream_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
    };
    (router(state), ctx)
}

async fn call(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Option<Value>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let json = if bytes.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(&bytes).unwrap())
    };
    (status, json)
}

// ── Pairing and introspection ─────────────────────────────────────────────────

#[tokio::test]
async fn test_new_token_opens_protected_routes() {
    // Arrange
    let (app, _ctx) = bridge();

    // Act
    let (status, body) = call(&app, Method::POST, "/api/v1/new", "").await;
    let body = body.unwrap();
    let token = body["auth_token"].as_str().unwrap().to_string();
    let (info_status, info) = call(&app, Method::GET, &format!("/api/v1/{token}"), "").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"], body["auth_token"]);
    assert_eq!(info_status, StatusCode::OK);
    let info = info.unwrap();
    assert_eq!(info["model"], "NL22");
    assert_eq!(info["panelLayout"]["layout"]["numPanels"], 1);
}

#[tokio::test]
async fn test_routes_accept_trailing_slash() {
    let (app, _ctx) = bridge();

    let (plain, _) = call(&app, Method::GET, "/api/v1", "").await;
    let (slash, _) = call(&app, Method::GET, "/api/v1/", "").await;
    let (layout, body) = call(&app, Method::GET, &format!("/api/v1/{TOKEN}/panelLayout/layout/"), "").await;

    assert_eq!(plain, StatusCode::OK);
    assert_eq!(slash, StatusCode::OK);
    assert_eq!(layout, StatusCode::OK);
    assert_eq!(body.unwrap()["positionData"][0]["panelId"], 1);
}

#[tokio::test]
async fn test_state_placeholders() {
    let (app, _ctx) = bridge();

    let (_, on) = call(&app, Method::GET, &format!("/api/v1/{TOKEN}/state/on"), "").await;
    let (_, brightness) = call(&app, Method::GET, &format!("/api/v1/{TOKEN}/state/brightness"), "").await;
    let (put_status, _) = call(
        &app,
        Method::PUT,
        &format!("/api/v1/{TOKEN}/state/brightness"),
        r#"{"brightness":{"value":40}}"#,
    )
    .await;

    assert_eq!(on, Some(json!({ "value": true })));
    assert_eq!(brightness, Some(json!({ "value": 100 })));
    assert_eq!(put_status, StatusCode::NO_CONTENT);
}

// ── Authorization ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_token_is_rejected_without_state_change() {
    // Arrange
    let (app, ctx) = bridge();
    let body = r#"{"write":{"command":"display","animType":"extControl","extControlVersion":"v2"}}"#;

    // Act: the same request twice with a wrong token.
    let first = call(&app, Method::PUT, "/api/v1/wrong/effects", body).await;
    let second = call(&app, Method::PUT, "/api/v1/wrong/effects", body).await;

    // Assert: identical 401s, and nothing changed.
    assert_eq!(first, second);
    assert_eq!(first.0, StatusCode::UNAUTHORIZED);
    assert_eq!(first.1, Some(json!({ "error": "unauthorized" })));
    assert!(!ctx.state.is_streaming_active());
    assert!(ctx.queue.try_take().is_none());
}

#[tokio::test]
async fn test_invalid_token_cannot_set_static_color() {
    let (app, ctx) = bridge();

    let (status, _) = call(&app, Method::PUT, "/api/v1/nope/effects", r#"{"r":255}"#).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(ctx.state.last_color(), None);
    assert_eq!(ctx.queue.published(), 0);
}

// ── Effects ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_v2_stream_handoff_is_no_content() {
    let (app, ctx) = bridge();
    let body = r#"{"write":{"command":"display","animType":"extControl","extControlVersion":"v2"}}"#;

    let (status, response) = call(&app, Method::PUT, &format!("/api/v1/{TOKEN}/effects"), body).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(response, None);
    assert!(ctx.state.is_streaming_active());
    let (_, selected) = call(&app, Method::GET, &format!("/api/v1/{TOKEN}/effects/select"), "").await;
    assert_eq!(selected, Some(json!({ "value": "*ExtControl*" })));
}

#[tokio::test]
async fn test_v1_stream_handoff_returns_destination() {
    let (app, ctx) = bridge();
    let body = r#"{"write":{"command":"display","animType":"extControl"}}"#;

    let (status, response) = call(&app, Method::PUT, &format!("/api/v1/{TOKEN}/effects"), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        response,
        Some(json!({
            "streamControlIpAddr": "192.168.1.20",
            "streamControlPort": 60222,
            "streamControlProtocol": "udp"
        }))
    );
    assert!(ctx.state.is_streaming_active());
}

#[tokio::test]
async fn test_static_color_reaches_frame_queue() {
    // Arrange
    let (app, ctx) = bridge();
    let body = r#"{"write":{"command":"display","animType":"static","animData":"1 1 1 12 34 56 0 1"}}"#;

    // Act
    let (status, response) = call(&app, Method::PUT, &format!("/api/v1/{TOKEN}/effects"), body).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, Some(json!({})));
    let frame = ctx.queue.take_next(Duration::from_millis(50)).await;
    assert_eq!(frame.map(|f| f.color), Some(Rgb::new(12, 34, 56)));
    assert_eq!(ctx.state.last_color(), Some(Rgb::new(12, 34, 56)));
}

#[tokio::test]
async fn test_select_is_acknowledged() {
    let (app, ctx) = bridge();

    let (status, _) = call(&app, Method::PUT, &format!("/api/v1/{TOKEN}/effects"), r#"{"select":"Solid"}"#).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!ctx.state.is_streaming_active());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, ctx) = bridge();

    let (status, response) = call(&app, Method::PUT, &format!("/api/v1/{TOKEN}/effects"), "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let response = response.unwrap();
    assert_eq!(response["error"], "invalid request body");
    assert!(response["detail"].is_string());
    assert_eq!(ctx.queue.published(), 0);
}

#[tokio::test]
async fn test_empty_body_is_ignored() {
    let (app, _ctx) = bridge();

    let (status, response) = call(&app, Method::PUT, &format!("/api/v1/{TOKEN}/effects"), "  ").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, Some(json!({})));
}

// ── Fallback ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_api_path_answers_with_device_info() {
    let (app, _ctx) = bridge();

    let (status, body) = call(&app, Method::GET, "/api/v1/something/else/entirely", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["name"], "Nanoleaf Canvas");
}

#[tokio::test]
async fn test_non_api_path_is_not_found() {
    let (app, _ctx) = bridge();

    let (status, _) = call(&app, Method::GET, "/favicon.ico", "").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
