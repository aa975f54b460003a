//! Adapters against mocked upstream HTTP endpoints.

use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marketscan_screener::data::eastmoney::EastmoneyAdapter;
use marketscan_screener::data::sina::{SinaAdapter, SinaNodeClient};
use marketscan_screener::data::tencent::SinaTencentAdapter;
use marketscan_screener::data::tushare::TushareAdapter;
use marketscan_screener::data::{CanonicalQuote, FieldNormalizer, ProviderAdapter, ProviderError, WorkerPool};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn fetch(adapter: &dyn ProviderAdapter) -> Result<Vec<CanonicalQuote>, ProviderError> {
    let payload = adapter
        .fetch_snapshot(&CancellationToken::new(), TIMEOUT)
        .await?;
    FieldNormalizer::new().normalize(&payload)
}

fn find<'a>(quotes: &'a [CanonicalQuote], code: &str) -> &'a CanonicalQuote {
    quotes
        .iter()
        .find(|q| q.code == code)
        .unwrap_or_else(|| panic!("{} missing", code))
}

// ============================================================================
// Eastmoney
// ============================================================================

fn clist(total: usize, diff: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "rc": 0,
        "data": { "total": total, "diff": diff }
    }))
}

#[tokio::test]
async fn test_eastmoney_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/clist/get"))
        .and(query_param("pn", "1"))
        .respond_with(clist(
            150,
            json!([
                {
                    "f12": "600519", "f13": 1, "f14": "贵州茅台",
                    "f2": 1700.5, "f3": 1.2, "f5": 23456, "f6": 3.98e9, "f7": 1.9,
                    "f8": 0.31, "f9": 24.5, "f10": 1.1, "f15": 1710.0, "f16": 1678.0,
                    "f18": 1680.3, "f20": 2.136e12, "f24": 12.5
                },
                {
                    "f12": "000001", "f13": 0, "f14": "平安银行",
                    "f2": "-", "f3": "-", "f5": "-", "f6": "-", "f7": "-",
                    "f8": "-", "f9": "-", "f10": "-", "f18": 11.2, "f20": 2.17e11, "f24": "-"
                }
            ]),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/qt/clist/get"))
        .and(query_param("pn", "2"))
        .respond_with(clist(
            150,
            json!({
                "0": {
                    "f12": "300750", "f13": 0, "f14": "宁德时代",
                    "f2": 190.0, "f3": 20.0, "f6": 8.0e9, "f10": 2.4, "f8": 1.8,
                    "f18": 158.33
                }
            }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = EastmoneyAdapter::with_base_url(server.uri(), 1, WorkerPool::new(2));
    let quotes = fetch(&adapter).await.unwrap();
    assert_eq!(quotes.len(), 3);

    let moutai = find(&quotes, "600519.SH");
    assert_eq!(moutai.name, "贵州茅台");
    assert_eq!(moutai.volume_ratio, 1.1);
    assert_eq!(moutai.change_60d_pct, Some(12.5));
    assert!(!moutai.is_halted);

    // Suspended: placeholders everywhere
    let pingan = find(&quotes, "000001.SZ");
    assert!(pingan.is_halted);
    assert_eq!(pingan.change_60d_pct, None);

    // ChiNext 20% limit
    assert!(find(&quotes, "300750.SZ").is_limit_up);
}

#[tokio::test]
async fn test_eastmoney_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let adapter = EastmoneyAdapter::with_base_url(server.uri(), 1, WorkerPool::default());
    match fetch(&adapter).await {
        Err(ProviderError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, Some(30)),
        other => panic!("expected RateLimited, got {:?}", other.map(|q| q.len())),
    }
}

#[tokio::test]
async fn test_eastmoney_garbage_is_schema_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let adapter = EastmoneyAdapter::with_base_url(server.uri(), 1, WorkerPool::default());
    assert!(matches!(
        fetch(&adapter).await,
        Err(ProviderError::SchemaMismatch(_))
    ));
}

// ============================================================================
// Sina and Sina + Tencent
// ============================================================================

async fn mount_sina(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/json_v2.php/Market_Center.getHQNodeStockCount"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"2\""))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json_v2.php/Market_Center.getHQNodeData"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "symbol": "sh600519", "code": "600519", "name": "贵州茅台",
                "trade": "1700.500", "changepercent": 1.2, "settlement": "1680.300",
                "high": "1710.000", "low": "1678.000", "volume": 2345600,
                "amount": 3980000000.0, "turnoverratio": 0.31, "per": 24.5,
                "mktcap": 213600000.0
            },
            {
                "symbol": "sz000004", "code": "000004", "name": "*ST国华",
                "trade": "5.020", "changepercent": -4.9, "settlement": "5.280",
                "volume": 100, "amount": 502.0, "turnoverratio": 0.01, "per": -3.2,
                "mktcap": 66400.0
            }
        ])))
        .mount(server)
        .await;
}

fn sina_nodes(server: &MockServer) -> SinaNodeClient {
    SinaNodeClient::new(format!("{}/json_v2.php", server.uri()), 6000, WorkerPool::default())
}

#[tokio::test]
async fn test_sina_basic_fields() {
    let server = MockServer::start().await;
    mount_sina(&server).await;

    let adapter = SinaAdapter::new(sina_nodes(&server), 3);
    let quotes = fetch(&adapter).await.unwrap();
    assert_eq!(quotes.len(), 2);

    let moutai = find(&quotes, "600519.SH");
    assert_eq!(moutai.price, 1700.5);
    // Market cap arrives in 10k yuan
    assert_eq!(moutai.market_cap_yuan, 2.136e12);
    // Not provided by this source
    assert_eq!(moutai.volume_ratio, 0.0);
    assert_eq!(moutai.change_60d_pct, None);
    assert!(moutai.has_core_coverage());

    let st = find(&quotes, "000004.SZ");
    assert!(st.is_st);
    assert_eq!(st.pe_ratio, 0.0);
}

#[tokio::test]
async fn test_sina_tencent_combined() {
    let server = MockServer::start().await;
    mount_sina(&server).await;

    let mut moutai = vec![""; 50];
    moutai[1] = "贵州茅台";
    moutai[2] = "600519";
    moutai[3] = "1700.50";
    moutai[4] = "1680.30";
    moutai[6] = "23456";
    moutai[32] = "1.20";
    moutai[37] = "398000.00";
    moutai[38] = "0.31";
    moutai[39] = "24.50";
    moutai[43] = "1.90";
    moutai[45] = "21360.00";
    moutai[47] = "1848.33";
    moutai[48] = "1512.27";
    moutai[49] = "1.10";
    let body = format!("v_sh600519=\"{}\";\nv_sz000004=\"\";\n", moutai.join("~"));

    Mock::given(method("GET"))
        .and(path_regex("^/q=sh600519,sz000004$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = SinaTencentAdapter::new(sina_nodes(&server), server.uri(), 6000, WorkerPool::default(), 2);
    let quotes = fetch(&adapter).await.unwrap();
    assert_eq!(quotes.len(), 1);

    let q = &quotes[0];
    assert_eq!(q.code, "600519.SH");
    assert_eq!(q.volume_ratio, 1.1);
    assert!((q.amount_yuan - 3.98e9).abs() < 1.0);
    assert!((q.market_cap_yuan - 2.136e12).abs() < 1.0);
    assert!(!q.is_limit_up);
}

// ============================================================================
// Tushare
// ============================================================================

fn table(fields: &[&str], items: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 0,
        "msg": "",
        "data": { "fields": fields, "items": items }
    }))
}

async fn mount_api(server: &MockServer, matcher: serde_json::Value, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(body_partial_json(matcher))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_tushare_joins_tables() {
    let server = MockServer::start().await;
    mount_api(
        &server,
        json!({ "api_name": "trade_cal", "token": "secret" }),
        table(&["cal_date", "is_open"], json!([["20240104", 1], ["20240105", 1]])),
    )
    .await;
    // Today's table not published yet
    mount_api(
        &server,
        json!({ "api_name": "daily", "params": { "trade_date": "20240105" } }),
        table(&["ts_code"], json!([])),
    )
    .await;
    mount_api(
        &server,
        json!({ "api_name": "daily", "params": { "trade_date": "20240104" } }),
        table(
            &["ts_code", "close", "pre_close", "pct_chg", "high", "low", "vol", "amount"],
            json!([
                ["600519.SH", 1700.5, 1680.3, 1.2, 1710.0, 1678.0, 23456.0, 3980000.0],
                ["000001.SZ", 11.3, 11.2, 0.89, 11.4, 11.1, 880000.0, 990000.0]
            ]),
        ),
    )
    .await;
    mount_api(
        &server,
        json!({ "api_name": "daily_basic" }),
        table(
            &["ts_code", "turnover_rate", "volume_ratio", "pe_ttm", "total_mv"],
            json!([["600519.SH", 0.31, 1.1, 24.5, 213600000.0]]),
        ),
    )
    .await;
    mount_api(
        &server,
        json!({ "api_name": "stock_basic" }),
        table(&["ts_code", "name"], json!([["600519.SH", "贵州茅台"], ["000001.SZ", "平安银行"]])),
    )
    .await;
    mount_api(
        &server,
        json!({ "api_name": "stk_limit" }),
        ResponseTemplate::new(200).set_body_json(json!({ "code": 40203, "msg": "limit", "data": null })),
    )
    .await;

    let adapter = TushareAdapter::with_base_url("secret", server.uri(), 0, WorkerPool::default());
    let quotes = fetch(&adapter).await.unwrap();
    assert_eq!(quotes.len(), 2);

    let moutai = find(&quotes, "600519.SH");
    assert_eq!(moutai.name, "贵州茅台");
    assert_eq!(moutai.volume_ratio, 1.1);
    assert!((moutai.amount_yuan - 3.98e9).abs() < 1.0);
    assert!((moutai.market_cap_yuan - 2.136e12).abs() < 1.0);

    // No daily_basic row: those fields stay unknown
    let pingan = find(&quotes, "000001.SZ");
    assert_eq!(pingan.name, "平安银行");
    assert_eq!(pingan.volume_ratio, 0.0);
    assert_eq!(pingan.pe_ratio, 0.0);
}

#[tokio::test]
async fn test_tushare_bad_token() {
    let server = MockServer::start().await;
    mount_api(
        &server,
        json!({ "api_name": "trade_cal" }),
        ResponseTemplate::new(200).set_body_json(json!({ "code": 40101, "msg": "token invalid", "data": null })),
    )
    .await;

    let adapter = TushareAdapter::with_base_url("wrong", server.uri(), 0, WorkerPool::default());
    assert!(matches!(fetch(&adapter).await, Err(ProviderError::Auth(_))));
}
