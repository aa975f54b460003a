//! A service assembled from on-disk configuration, backed by a mocked source.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marketscan_common::Config;
use marketscan_screener::{build_router, ScreenerState};

async fn eastmoney_mock() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/clist/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rc": 0,
            "data": {
                "total": 2,
                "diff": [
                    {
                        "f12": "600000", "f13": 1, "f14": "浦发银行",
                        "f2": 10.2, "f3": 2.0, "f5": 490000, "f6": 5.0e8, "f7": 3.0,
                        "f8": 1.2, "f9": 20.0, "f10": 2.5, "f18": 10.0, "f20": 2.0e10, "f24": 4.0
                    },
                    {
                        "f12": "600036", "f13": 1, "f14": "招商银行",
                        "f2": 35.5, "f3": 1.5, "f5": 84000, "f6": 3.0e8, "f7": 2.0,
                        "f8": 0.8, "f9": 20.0, "f10": 2.0, "f18": 34.98, "f20": 2.0e10, "f24": 6.0
                    }
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    server
}

fn write_config(dir: &std::path::Path, server: &MockServer) {
    fs::write(
        dir.join("config.json"),
        r#"{"observability": {"log_level": "debug"}}"#,
    )
    .unwrap();
    fs::write(
        dir.join("screener.json"),
        json!({
            "$schema": "https://example.invalid/screener.schema.json",
            "sources": [
                { "provider": "eastmoney", "priority": 0, "base_url": server.uri() },
                { "provider": "tushare", "priority": 1, "enabled": false }
            ],
            "thresholds": { "top_n": 1 }
        })
        .to_string(),
    )
    .unwrap();
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_service_from_config_directory() {
    let server = eastmoney_mock().await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server);

    let config = Config::load_from_dir(dir.path()).unwrap();
    assert_eq!(config.screener.thresholds.top_n, 1);
    assert_eq!(config.observability.log_level, "debug");

    let state = ScreenerState::new(config).unwrap();
    assert_eq!(state.pipeline.chain().len(), 1);
    let app = build_router(Arc::new(state));

    let (status, body) = get(app.clone(), "/api/v1/market/recommendations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["buy"].as_array().unwrap().len(), 1);
    assert_eq!(body["buy"][0]["code"], "600000.SH");
    assert_eq!(body["buy"][0]["name"], "浦发银行");
    assert_eq!(body["buy"][0]["market_cap"], "200亿");

    // Served from the cached snapshot: the mock expects a single page request
    let (_, again) = get(app.clone(), "/api/v1/market/recommendations").await;
    assert_eq!(again, body);

    let (_, providers) = get(app, "/api/v1/market/providers").await;
    assert_eq!(providers["count"], 1);
    assert_eq!(providers["providers"][0]["name"], "eastmoney");
    assert_eq!(providers["providers"][0]["health"]["total_attempts"], 1);
    assert_eq!(providers["providers"][0]["health"]["total_failures"], 0);
}
