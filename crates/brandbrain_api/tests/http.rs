//! Handler-level tests: status-code mapping and response shapes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use brandbrain_api::{router, AppState};
use brandbrain_compile::CompileService;
use brandbrain_db::{Brand, BrandBrainDb, SourceConnection};
use brandbrain_protocol::{BrandBrainConfig, BrandId, Capability, Platform, SourceConnectionId};

async fn setup() -> (axum::Router, BrandBrainDb) {
    let db = BrandBrainDb::open_memory().await.unwrap();
    let config = Arc::new(BrandBrainConfig::default());
    let service = Arc::new(CompileService::new(db.clone(), config));
    (router(AppState { service }), db)
}

async fn seed_ready_brand(db: &BrandBrainDb) -> BrandId {
    let brand = Brand {
        id: BrandId::new(),
        org_id: "org-1".to_string(),
        name: "Acme".to_string(),
        slug: "acme".to_string(),
        deleted_at: None,
    };
    db.create_brand(&brand).await.unwrap();
    db.upsert_onboarding(
        &brand.id,
        0,
        &json!({
            "brand_name": "Acme",
            "value_prop": "Anvils",
            "target_audience": "Coyotes"
        }),
        Utc::now(),
    )
    .await
    .unwrap();
    let now = Utc::now();
    db.upsert_source_connection(&SourceConnection {
        id: SourceConnectionId::new(),
        brand_id: brand.id.clone(),
        platform: Platform::Instagram,
        capability: Capability::Posts,
        identifier: "acme".to_string(),
        is_enabled: true,
        settings: json!({}),
        created_at: now,
        updated_at: now,
    })
    .await
    .unwrap();
    brand.id
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_compile_kickoff_is_202() {
    let (app, db) = setup().await;
    let brand_id = seed_ready_brand(&db).await;

    let (status, body) = send(
        &app,
        post_json(
            &format!("/api/brands/{brand_id}/brandbrain/compile"),
            json!({"force_refresh": false}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PENDING");
    assert!(body["compile_run_id"].is_string());
    assert!(body["poll_url"].as_str().unwrap().contains("/status"));
}

#[tokio::test]
async fn test_gating_failure_is_422_with_codes() {
    let (app, db) = setup().await;
    // Brand without onboarding or sources.
    let brand = Brand {
        id: BrandId::new(),
        org_id: "org-1".to_string(),
        name: "Bare".to_string(),
        slug: "bare".to_string(),
        deleted_at: None,
    };
    db.create_brand(&brand).await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            &format!("/api/brands/{}/brandbrain/compile", brand.id),
            json!({}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let codes: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["code"].as_str().unwrap())
        .collect();
    assert!(codes.contains(&"ONBOARDING_MISSING"));
    assert!(codes.contains(&"NO_ENABLED_SOURCES"));
}

#[tokio::test]
async fn test_malformed_brand_id_is_400() {
    let (app, _db) = setup().await;
    let (status, _) = send(
        &app,
        post_json("/api/brands/not-a-uuid/brandbrain/compile", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let (app, db) = setup().await;
    let brand_id = seed_ready_brand(&db).await;
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/brands/{brand_id}/brandbrain/compile"))
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_brand_is_404() {
    let (app, _db) = setup().await;
    let ghost = BrandId::new();
    let (status, _) = send(&app, get(&format!("/api/brands/{ghost}/brandbrain/latest"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cross_tenant_status_is_404() {
    let (app, db) = setup().await;
    let brand_a = seed_ready_brand(&db).await;
    let brand_b = {
        let brand = Brand {
            id: BrandId::new(),
            org_id: "org-2".to_string(),
            name: "Other".to_string(),
            slug: "other".to_string(),
            deleted_at: None,
        };
        db.create_brand(&brand).await.unwrap();
        brand.id
    };

    let (status, body) = send(
        &app,
        post_json(
            &format!("/api/brands/{brand_a}/brandbrain/compile"),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["compile_run_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        get(&format!(
            "/api/brands/{brand_b}/brandbrain/compile/{run_id}/status"
        )),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        get(&format!(
            "/api/brands/{brand_a}/brandbrain/compile/{run_id}/status"
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_latest_rejects_unknown_include() {
    let (app, db) = setup().await;
    let brand_id = seed_ready_brand(&db).await;
    let (status, _) = send(
        &app,
        get(&format!(
            "/api/brands/{brand_id}/brandbrain/latest?include=bogus"
        )),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_history_validates_page_size() {
    let (app, db) = setup().await;
    let brand_id = seed_ready_brand(&db).await;
    let (status, _) = send(
        &app,
        get(&format!(
            "/api/brands/{brand_id}/brandbrain/history?page=1&page_size=51"
        )),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        get(&format!("/api/brands/{brand_id}/brandbrain/history")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["page"], 1);
}

#[tokio::test]
async fn test_overrides_roundtrip_over_http() {
    let (app, db) = setup().await;
    let brand_id = seed_ready_brand(&db).await;
    let uri = format!("/api/brands/{brand_id}/brandbrain/overrides");

    // Empty document when none exist.
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overrides_json"], json!({}));

    let patch = Request::builder()
        .method("PATCH")
        .uri(&uri)
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "overrides_json": {"voice.tone": "bold"},
                "pinned_paths": ["voice.tone"]
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app, patch).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overrides_json"]["voice.tone"], "bold");
    assert_eq!(body["pinned_paths"], json!(["voice.tone"]));

    let (_, body) = send(&app, get(&uri)).await;
    assert_eq!(body["overrides_json"]["voice.tone"], "bold");
}
