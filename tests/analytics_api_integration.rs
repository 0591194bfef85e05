//! Integration tests for the page view analytics API
//!
//! These drive the real router end-to-end against an in-memory SQLite store
//! with a manually controlled clock.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use folio::analytics::models::{StatsFilter, ViewEvent};
use folio::analytics::{Analytics, AnalyticsSettings, Clock, ManualClock, ServerZone};
use folio::auth::AuthService;
use folio::config::WebSocketConfig;
use folio::storage::{SqliteStorage, ViewStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<dyn ViewStore>,
    clock: Arc<ManualClock>,
}

/// Helper to create the app with an empty store and the clock at 2024-01-15 12:00 UTC
async fn create_test_app(api_key: Option<&str>) -> TestApp {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    let store: Arc<dyn ViewStore> = Arc::new(storage);

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
    ));
    let settings = AnalyticsSettings {
        zone: ServerZone::utc(),
        ..AnalyticsSettings::default()
    };
    let (analytics, _coordinator) = Analytics::new(Arc::clone(&store), &settings, clock.clone());

    let router = folio::api::create_api_router(
        analytics,
        Arc::new(AuthService::new(api_key.map(str::to_string))),
        WebSocketConfig::default(),
    );

    TestApp {
        router,
        store,
        clock,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

fn track_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/analytics/track")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn view(page: &str, visitor: &str, viewed_at: i64, country: Option<&str>) -> ViewEvent {
    ViewEvent {
        page: page.to_string(),
        visitor_id: visitor.to_string(),
        user_agent: Some("Mozilla/5.0".to_string()),
        referrer: None,
        ip: None,
        country: country.map(str::to_string),
        city: None,
        session_id: None,
        viewed_at,
    }
}

async fn rows_for_page(store: &Arc<dyn ViewStore>, page: &str) -> i64 {
    let windows = ServerZone::utc().windows(Utc::now());
    store
        .count_predicate(&StatsFilter::page(Some(page)), &windows)
        .await
        .unwrap()
        .total
}

fn assert_nested(aggregate: &Value) {
    let n = |k: &str| aggregate[k].as_i64().unwrap();
    assert!(n("today") <= n("week"));
    assert!(n("week") <= n("month"));
    assert!(n("month") <= n("total"));
    assert!(n("unique") <= n("total"));
}

#[tokio::test]
async fn test_first_view_then_dedup() {
    let app = create_test_app(None).await;
    let body = json!({"page": "/", "visitorId": "v1", "userAgent": "Mozilla/5.0"});

    let (status, json) = send(&app.router, track_request(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(
        json["data"],
        json!({"total": 1, "today": 1, "week": 1, "month": 1, "unique": 1})
    );

    let (status, repeat) = send(&app.router, track_request(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(repeat["data"], json["data"]);
    assert_eq!(rows_for_page(&app.store, "/").await, 1);
}

#[tokio::test]
async fn test_bot_view_is_skipped() {
    let app = create_test_app(None).await;

    let (status, json) = send(
        &app.router,
        track_request(json!({"page": "/x", "visitorId": "b1", "userAgent": "Googlebot/2.1"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["data"],
        json!({"total": 0, "today": 0, "week": 0, "month": 0, "unique": 0})
    );
    assert_eq!(rows_for_page(&app.store, "/x").await, 0);
}

#[tokio::test]
async fn test_bot_detected_from_user_agent_header() {
    let app = create_test_app(None).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/analytics/track")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "Mozilla/5.0 (compatible; YandexSpider)")
        .body(Body::from(json!({"page": "/", "visitorId": "v1"}).to_string()))
        .unwrap();
    let (status, _) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows_for_page(&app.store, "/").await, 0);
}

#[tokio::test]
async fn test_unique_versus_total() {
    let app = create_test_app(None).await;
    let track = |visitor: &str| {
        track_request(json!({"page": "/", "visitorId": visitor, "userAgent": "Mozilla/5.0"}))
    };

    send(&app.router, track("v1")).await;
    app.clock.advance(chrono::Duration::seconds(31));
    send(&app.router, track("v2")).await;
    let (_, json) = send(&app.router, track("v1")).await;

    assert_eq!(json["data"]["total"], 3);
    assert_eq!(json["data"]["unique"], 2);
    assert_nested(&json["data"]);
}

#[tokio::test]
async fn test_missing_page_is_bad_request() {
    let app = create_test_app(None).await;

    let (status, json) = send(&app.router, track_request(json!({"visitorId": "v1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("page"));

    let malformed = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/analytics/track")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&app.router, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_views_reflect_ingest_despite_cache() {
    let app = create_test_app(None).await;
    let track = |visitor: &str| {
        track_request(json!({"page": "/blog", "visitorId": visitor, "userAgent": "Mozilla/5.0"}))
    };

    send(&app.router, track("v1")).await;

    // Prime both the unfiltered and a filtered entry for the page
    let (_, before) = send(&app.router, get("/api/v1/analytics/views?page=/blog")).await;
    assert_eq!(before["data"]["total"], 1);
    let (_, filtered_before) = send(
        &app.router,
        get("/api/v1/analytics?page=/blog&startDate=2024-01-01T00:00:00Z"),
    )
    .await;
    assert_eq!(filtered_before["data"]["total"], 1);

    send(&app.router, track("v2")).await;

    let (_, after) = send(&app.router, get("/api/v1/analytics/views?page=/blog")).await;
    assert_eq!(after["data"]["total"], 2);
    let (_, filtered_after) = send(
        &app.router,
        get("/api/v1/analytics?page=/blog&startDate=2024-01-01T00:00:00Z"),
    )
    .await;
    assert_eq!(filtered_after["data"]["total"], 2);

    let (_, all) = send(&app.router, get("/api/v1/analytics/views")).await;
    assert_eq!(all["data"]["total"], 2);
}

#[tokio::test]
async fn test_filtered_stats() {
    let app = create_test_app(None).await;
    let now = app.clock.now().timestamp();
    for event in [
        view("/", "v1", now - 3_600, Some("US")),
        view("/", "v2", now - 10 * 86_400, Some("US")),
        view("/", "v3", now - 40 * 86_400, Some("GB")),
        view("/about", "v1", now - 60, None),
    ] {
        app.store.append(&event).await.unwrap();
    }

    let (status, us) = send(&app.router, get("/api/v1/analytics?page=/&country=US")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        us["data"],
        json!({"total": 2, "today": 1, "week": 1, "month": 2, "unique": 2})
    );

    let (_, ranged) = send(
        &app.router,
        get("/api/v1/analytics?startDate=2024-01-01T00:00:00Z&endDate=2024-01-15T12:00:00Z"),
    )
    .await;
    assert_eq!(ranged["data"]["total"], 3);
    assert_nested(&ranged["data"]);

    let (_, everything) = send(&app.router, get("/api/v1/analytics")).await;
    assert_eq!(everything["data"]["total"], 4);
    assert_eq!(everything["data"]["unique"], 3);
}

#[tokio::test]
async fn test_filtered_stats_validation() {
    let app = create_test_app(None).await;

    let (status, json) = send(
        &app.router,
        get("/api/v1/analytics?startDate=2024-02-01T00:00:00Z&endDate=2024-01-01T00:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (status, json) = send(&app.router, get("/api/v1/analytics?startDate=yesterday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("startDate"));
}

#[tokio::test]
async fn test_daily_series() {
    let app = create_test_app(None).await;
    let day1 = Utc.with_ymd_and_hms(2024, 1, 13, 0, 0, 0).unwrap().timestamp();
    let day2 = day1 + 86_400;
    for (i, ts) in [day1 + 60, day1 + 3_600, day2 + 10, day2 + 7_200, day2 + 80_000]
        .into_iter()
        .enumerate()
    {
        app.store
            .append(&view("/", &format!("v{i}"), ts, None))
            .await
            .unwrap();
    }

    let uri = "/api/v1/analytics/series?page=/&startDate=2024-01-13T00:00:00Z&endDate=2024-01-14T23:59:59Z&interval=day";
    let (status, json) = send(&app.router, get(uri)).await;
    assert_eq!(status, StatusCode::OK);

    let points = json["data"].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["bucket_start"], "2024-01-13T00:00:00+00:00");
    assert_eq!(points[1]["bucket_start"], "2024-01-14T00:00:00+00:00");
    let sum: i64 = points.iter().map(|p| p["count"].as_i64().unwrap()).sum();
    assert_eq!(sum, 5);

    // Nothing new in range: identical response
    let (_, again) = send(&app.router, get(uri)).await;
    assert_eq!(again, json);
}

#[tokio::test]
async fn test_series_edge_cases() {
    let app = create_test_app(None).await;

    let (status, json) = send(&app.router, get("/api/v1/analytics/series?page=/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"], json!([]));

    let (status, _) = send(
        &app.router,
        get("/api/v1/analytics/series?startDate=not-a-date&endDate=2024-01-14T00:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_key_gates_tracking_only() {
    let app = create_test_app(Some("s3cret")).await;
    let body = json!({"page": "/", "visitorId": "v1", "userAgent": "Mozilla/5.0"});

    let (status, json) = send(&app.router, track_request(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);

    let mut request = track_request(body);
    request
        .headers_mut()
        .insert("X-API-Key", "s3cret".parse().unwrap());
    let (status, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 1);

    let (status, _) = send(&app.router, get("/api/v1/analytics/views?page=/")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app(None).await;
    let (status, json) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"success": true, "data": {"status": "ok"}}));
}
