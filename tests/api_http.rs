// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /generate input validation (422 + {detail})
// - POST /generate happy path against the local page server
// - POST /generate error payload shape when the pipeline fails

mod common;

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use common::{build_harness, hit, spawn_page_server, FailingLlm, ScriptedLlm, TestHarness};
use research_deck_pipeline::api::{create_router, AppState};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn router_for(harness: &TestHarness) -> Router {
    create_router(
        AppState {
            orchestrator: Arc::clone(&harness.orchestrator),
        },
        &harness.settings,
    )
}

async fn json_body(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    serde_json::from_slice(&bytes).expect("parse json body")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let harness = build_harness(Vec::new(), Arc::new(FailingLlm), |_| {});
    let app = router_for(&harness);

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn api_generate_rejects_bad_input_with_detail() {
    let harness = build_harness(Vec::new(), Arc::new(FailingLlm), |_| {});

    for payload in [
        json!({ "topic": "   " }),
        json!({ "topic": "ok topic", "max_sources": 0 }),
    ] {
        let req = Request::builder()
            .method("POST")
            .uri("/generate")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("build POST /generate");

        let resp = router_for(&harness)
            .oneshot(req)
            .await
            .expect("oneshot /generate");
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let v = json_body(resp).await;
        assert!(v.get("detail").is_some(), "error payload carries 'detail'");
    }
}

#[tokio::test]
async fn api_generate_returns_ppt_url_on_success() {
    let addr = spawn_page_server().await;
    let hits = (0..3).map(|n| hit(addr, &format!("/good/{n}"))).collect();
    let harness = build_harness(hits, Arc::new(ScriptedLlm::quantitative()), |_| {});
    let app = router_for(&harness);

    let payload = json!({
        "topic": "Edge Computing",
        "max_sources": 3,
        "theme_config": { "accent_color": "#22C55E" }
    });
    let req = Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /generate");

    let resp = app.oneshot(req).await.expect("oneshot /generate");
    assert!(
        resp.status().is_success(),
        "POST /generate should be 2xx, got {}",
        resp.status()
    );

    let v = json_body(resp).await;
    // Contract checks for UI consumers
    assert_eq!(v["topic"], "Edge Computing");
    let ppt_url = v["ppt_url"].as_str().expect("ppt_url string");
    assert!(ppt_url.contains("/outputs/edge-computing_"));
    assert!(v.get("ppt_filename").is_some(), "missing 'ppt_filename'");
    assert!(v.get("message").is_some(), "missing 'message'");
}

#[tokio::test]
async fn api_generate_maps_pipeline_failure_to_500_detail() {
    let addr = spawn_page_server().await;
    let hits = vec![hit(addr, "/good/1")];
    let harness = build_harness(hits, Arc::new(FailingLlm), |_| {});
    let app = router_for(&harness);

    let payload = json!({ "topic": "Doomed Topic" });
    let req = Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /generate");

    let resp = app.oneshot(req).await.expect("oneshot /generate");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v = json_body(resp).await;
    let detail = v["detail"].as_str().expect("detail string");
    assert!(detail.contains("summarization failed"));
}
