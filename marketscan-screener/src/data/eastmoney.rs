//! Eastmoney full-market adapter.
//!
//! Pulls the A-share list from the push2 `clist` endpoint, which carries
//! every canonical field including volume ratio and 60-day change. The
//! first page tells us the total; the remaining pages go through the
//! worker pool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use marketscan_common::DataSourceEntry;

use super::fields::{Field, FieldSet};
use super::pool::WorkerPool;
use super::provider::{check_status, http_client, ProviderAdapter, ProviderError, RawPayload, RawRow};

// ============================================================================
// Constants
// ============================================================================

const EASTMONEY_BASE_URL: &str = "https://82.push2.eastmoney.com";

const CLIST_PATH: &str = "/api/qt/clist/get";

/// Server-side page cap
const PAGE_SIZE: usize = 100;

/// Safety bound on pages per snapshot
const MAX_PAGES: usize = 100;

/// Shanghai and Shenzhen main boards, ChiNext, STAR, Beijing
const MARKET_FILTER: &str = "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23,m:0+t:81+s:2048";

/// Columns requested, mapped in [`map_row`]
const FIELDS: &str = "f2,f3,f5,f6,f7,f8,f9,f10,f12,f13,f14,f15,f16,f18,f20,f24";

const COLUMNS: &[(&str, Field)] = &[
    ("f14", Field::Name),
    ("f2", Field::Price),
    ("f3", Field::ChangePct),
    ("f5", Field::Volume),
    ("f6", Field::Amount),
    ("f7", Field::Amplitude),
    ("f8", Field::TurnoverRate),
    ("f9", Field::PeRatio),
    ("f10", Field::VolumeRatio),
    ("f15", Field::High),
    ("f16", Field::Low),
    ("f18", Field::PrevClose),
    ("f20", Field::MarketCap),
    ("f24", Field::Change60d),
];

// ============================================================================
// Eastmoney Adapter
// ============================================================================

pub struct EastmoneyAdapter {
    client: reqwest::Client,
    base_url: String,
    priority: u8,
    pool: WorkerPool,
}

impl EastmoneyAdapter {
    pub fn new(pool: WorkerPool) -> Self {
        Self::with_base_url(EASTMONEY_BASE_URL, 1, pool)
    }

    pub fn with_base_url(base_url: impl Into<String>, priority: u8, pool: WorkerPool) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            priority,
            pool,
        }
    }

    pub fn from_entry(entry: &DataSourceEntry, pool: WorkerPool) -> Self {
        Self::with_base_url(
            entry.base_url.as_deref().unwrap_or(EASTMONEY_BASE_URL),
            entry.priority,
            pool,
        )
    }

    async fn fetch_page(&self, page: usize, timeout: Duration) -> Result<ClistPage, ProviderError> {
        let url = format!("{}{}", self.base_url, CLIST_PATH);
        let page_str = page.to_string();
        let page_size = PAGE_SIZE.to_string();

        debug!(page, "Fetching eastmoney clist page");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("pn", page_str.as_str()),
                ("pz", page_size.as_str()),
                ("po", "1"),
                ("np", "1"),
                ("fltt", "2"),
                ("invt", "2"),
                ("fid", "f12"),
                ("fs", MARKET_FILTER),
                ("fields", FIELDS),
            ])
            .timeout(timeout)
            .send()
            .await?;

        let body: ClistResponse = check_status(response)?.json().await?;

        if body.rc != 0 {
            return Err(ProviderError::SchemaMismatch(format!(
                "eastmoney rc={}",
                body.rc
            )));
        }

        let data = body.data.unwrap_or_default();
        let rows = match data.diff {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            // np=0 form: {"0": {...}, "1": {...}}
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(_, v)| match v {
                    Value::Object(m) => Some(m),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(ClistPage {
            total: data.total,
            rows,
        })
    }
}

#[async_trait]
impl ProviderAdapter for EastmoneyAdapter {
    fn name(&self) -> &str {
        "eastmoney"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> FieldSet {
        FieldSet::FULL
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        let first = self.fetch_page(1, timeout).await?;
        if first.rows.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }

        let pages = first.total.div_ceil(PAGE_SIZE).clamp(1, MAX_PAGES);
        let mut rows: Vec<RawRow> = first.rows.iter().filter_map(map_row).collect();

        if pages > 1 {
            let tasks: Vec<_> = (2..=pages).map(|p| self.fetch_page(p, timeout)).collect();
            let (rest, failed) = self.pool.collect_ok(cancel, tasks).await?;
            if failed > 0 {
                warn!(failed, pages, "Some eastmoney pages failed, snapshot is partial");
            }
            rows.extend(rest.iter().flat_map(|page| page.rows.iter().filter_map(map_row)));
        }

        debug!(total = first.total, rows = rows.len(), "Eastmoney snapshot assembled");
        Ok(RawPayload::new(rows))
    }
}

fn map_row(item: &Map<String, Value>) -> Option<RawRow> {
    let code = item.get("f12").and_then(value_text)?;
    let market = item.get("f13").and_then(value_text).unwrap_or_default();
    let code = if market.is_empty() {
        code
    } else {
        format!("{}.{}", market, code)
    };

    let mut row = RawRow::new().with(Field::Code, code);
    for (key, field) in COLUMNS {
        if let Some(value) = item.get(*key) {
            row.set(*field, value.clone());
        }
    }
    Some(row)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Response Types
// ============================================================================

struct ClistPage {
    total: usize,
    rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ClistResponse {
    #[serde(default)]
    rc: i64,
    data: Option<ClistData>,
}

#[derive(Debug, Default, Deserialize)]
struct ClistData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    diff: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_row() {
        let item = json!({
            "f12": "600519", "f13": 1, "f14": "贵州茅台",
            "f2": 1700.5, "f3": 1.2, "f10": "-", "f24": 12.5
        });
        let row = map_row(item.as_object().unwrap()).unwrap();
        assert_eq!(row.get(Field::Code), Some(&json!("1.600519")));
        assert_eq!(row.get(Field::Price), Some(&json!(1700.5)));
        assert_eq!(row.get(Field::VolumeRatio), Some(&json!("-")));
        assert!(!row.has(Field::TurnoverRate));
    }

    #[test]
    fn test_map_row_requires_code() {
        let item = json!({ "f14": "nameless", "f2": 1.0 });
        assert!(map_row(item.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_capabilities() {
        let adapter = EastmoneyAdapter::new(WorkerPool::default());
        assert_eq!(adapter.name(), "eastmoney");
        assert_eq!(adapter.capabilities(), FieldSet::FULL);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_fetch_live_snapshot() {
        let adapter = EastmoneyAdapter::new(WorkerPool::default());
        let payload = adapter
            .fetch_snapshot(&CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(payload.len() > 1000);
    }
}
