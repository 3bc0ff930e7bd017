//! API surface behavior.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, body_bytes, request};
use serde_json::Value;
use tonindex_metadata::{SiteCreate, SiteStatus, SitesRepo};
use tonindex_server::create_api_router;
use tower::ServiceExt;

fn site(domain: &str, zone: &str) -> SiteCreate {
    SiteCreate {
        domain: domain.to_string(),
        unicode: domain.to_string(),
        zone: zone.to_string(),
        address: format!("0:{}", "ab".repeat(32)),
    }
}

async fn seed_accessible(harness: &TestHarness, domain: &str, zone: &str) {
    harness
        .store
        .add_domains(&[site(domain, zone)])
        .await
        .unwrap();
    harness
        .store
        .finalize_check(domain, SiteStatus::Accessible, false, false)
        .await
        .unwrap();
}

async fn get_json(router: &axum::Router, path: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request("GET", "api.example", path))
        .await
        .unwrap();
    let status = response.status();
    let body = body_bytes(response).await;
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn stats_counts_by_status() {
    let harness = TestHarness::new();
    seed_accessible(&harness, "a.ton", ".ton").await;
    harness
        .store
        .add_domains(&[site("b.ton", ".ton")])
        .await
        .unwrap();
    harness
        .store
        .finalize_check("b.ton", SiteStatus::Inaccessible, false, false)
        .await
        .unwrap();
    harness
        .store
        .add_domains(&[site("c.ton", ".ton")])
        .await
        .unwrap();

    let router = create_api_router(harness.state.clone());
    let (status, json) = get_json(&router, "/sites/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["domains"], 3);
    assert_eq!(json["sites"], 2);
    assert_eq!(json["active"], 1);
}

#[tokio::test]
async fn random_site_is_not_found_when_empty() {
    let harness = TestHarness::new();
    let router = create_api_router(harness.state.clone());
    let (status, _) = get_json(&router, "/sites/random").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn random_site_returns_the_accessible_one() {
    let harness = TestHarness::new();
    seed_accessible(&harness, "only.ton", ".ton").await;

    let router = create_api_router(harness.state.clone());
    let (status, json) = get_json(&router, "/sites/random").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["domain"], "only.ton");
    assert_eq!(json["accessible"], true);
}

#[tokio::test]
async fn sites_listing_paginates_through_the_cursor() {
    let harness = TestHarness::new();
    for i in 0..5 {
        seed_accessible(&harness, &format!("page{i}.ton"), ".ton").await;
    }

    let router = create_api_router(harness.state.clone());
    let (status, json) = get_json(&router, "/sites?limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sites"].as_array().unwrap().len(), 3);
    assert_eq!(json["sites"][0]["domain"], "page0.ton");
    let cursor = json["cursor"].as_str().unwrap().to_string();

    let (status, json) = get_json(&router, &format!("/sites?limit=3&cursor={cursor}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sites"].as_array().unwrap().len(), 2);
    assert_eq!(json["sites"][0]["domain"], "page3.ton");
    assert!(json.get("cursor").is_none());
}

#[tokio::test]
async fn sites_listing_validates_parameters() {
    let harness = TestHarness::new();
    let router = create_api_router(harness.state.clone());

    for path in [
        "/sites?zone=.example",
        "/sites?sort=size",
        "/sites?limit=0",
        "/sites?limit=101",
        "/sites?limit=abc",
        "/sites?cursor=%21%21%21",
        "/sites?sort=checked_at&cursor=bm9jb2xvbg==",
    ] {
        let (status, _) = get_json(&router, path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "expected 400 for {path}");
    }

    // configured zones pass
    let (status, _) = get_json(&router, "/sites?zone=.ton").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get_json(&router, "/sites?zone=.t.me").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn sites_listing_applies_filters() {
    let harness = TestHarness::new();
    seed_accessible(&harness, "keep.ton", ".ton").await;
    seed_accessible(&harness, "other.me.t.me", ".t.me").await;
    harness
        .store
        .add_domains(&[site("bad.ton", ".ton")])
        .await
        .unwrap();
    harness
        .store
        .finalize_check("bad.ton", SiteStatus::Accessible, false, true)
        .await
        .unwrap();

    let router = create_api_router(harness.state.clone());

    let (_, json) = get_json(&router, "/sites").await;
    assert_eq!(json["sites"].as_array().unwrap().len(), 2);

    let (_, json) = get_json(&router, "/sites?spam=1").await;
    assert_eq!(json["sites"].as_array().unwrap().len(), 3);

    let (_, json) = get_json(&router, "/sites?zone=.t.me").await;
    let sites = json["sites"].as_array().unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0]["domain"], "other.me.t.me");

    let (_, json) = get_json(&router, "/sites?search=keep").await;
    assert_eq!(json["sites"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn cors_headers_are_always_present() {
    let harness = TestHarness::new();
    let router = create_api_router(harness.state.clone());

    let response = router
        .clone()
        .oneshot(request("OPTIONS", "api.example", "/sites"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-methods")
            .unwrap(),
        "GET, POST, PUT, DELETE, OPTIONS"
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-headers")
            .unwrap(),
        "Content-Type"
    );

    let response = router
        .oneshot(request("GET", "api.example", "/sites/stats"))
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}
