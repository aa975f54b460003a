//! Sina market center adapter.
//!
//! The node list endpoint returns price, change%, amount, turnover, PE and
//! market cap (in 10k yuan) for every A-share, but no volume ratio or
//! 60-day change. Those stay unknown rather than being made up.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use marketscan_common::DataSourceEntry;

use super::fields::{Field, FieldSet};
use super::pool::WorkerPool;
use super::provider::{
    check_status, http_client, ProviderAdapter, ProviderError, RawPayload, RawRow, Unit,
};
use super::rate_limiter::RateLimiter;

// ============================================================================
// Constants
// ============================================================================

const SINA_BASE_URL: &str = "https://vip.stock.finance.sina.com.cn/quotes_service/api/json_v2.php";

const SINA_REFERER: &str = "https://finance.sina.com.cn/";

const NODE: &str = "hs_a";

const PAGE_SIZE: usize = 100;

const MAX_PAGES: usize = 100;

/// Default request budget, below the observed ban threshold
pub const DEFAULT_SINA_RPM: u32 = 300;

const COLUMNS: &[(&str, Field)] = &[
    ("name", Field::Name),
    ("trade", Field::Price),
    ("changepercent", Field::ChangePct),
    ("settlement", Field::PrevClose),
    ("high", Field::High),
    ("low", Field::Low),
    ("volume", Field::Volume),
    ("amount", Field::Amount),
    ("turnoverratio", Field::TurnoverRate),
    ("per", Field::PeRatio),
    ("mktcap", Field::MarketCap),
];

// ============================================================================
// Node list client
// ============================================================================

/// Paged access to the Sina A-share node list.
pub struct SinaNodeClient {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    pool: WorkerPool,
}

impl SinaNodeClient {
    pub fn new(base_url: impl Into<String>, requests_per_minute: u32, pool: WorkerPool) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::new("sina", requests_per_minute)),
            pool,
        }
    }

    pub fn from_entry(entry: &DataSourceEntry, pool: WorkerPool) -> Self {
        Self::new(
            entry.base_url.as_deref().unwrap_or(SINA_BASE_URL),
            entry.requests_per_minute.unwrap_or(DEFAULT_SINA_RPM),
            pool,
        )
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.limiter.requests_per_minute()
    }

    async fn stock_count(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<usize, ProviderError> {
        self.limiter.acquire(cancel).await?;
        let url = format!("{}/Market_Center.getHQNodeStockCount", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("node", NODE)])
            .header(reqwest::header::REFERER, SINA_REFERER)
            .timeout(timeout)
            .send()
            .await?;
        let body = check_status(response)?.text().await?;

        // Body is a JSON string such as "5321"
        body.trim()
            .trim_matches('"')
            .parse::<usize>()
            .map_err(|_| ProviderError::SchemaMismatch(format!("sina stock count: {}", body.trim())))
    }

    async fn fetch_page(
        &self,
        page: usize,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<Map<String, Value>>, ProviderError> {
        self.limiter.acquire(cancel).await?;
        let url = format!("{}/Market_Center.getHQNodeData", self.base_url);
        let page_str = page.to_string();
        let num = PAGE_SIZE.to_string();

        debug!(page, "Fetching sina node page");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("page", page_str.as_str()),
                ("num", num.as_str()),
                ("sort", "symbol"),
                ("asc", "1"),
                ("node", NODE),
                ("_s_r_a", "page"),
            ])
            .header(reqwest::header::REFERER, SINA_REFERER)
            .timeout(timeout)
            .send()
            .await?;

        let body = check_status(response)?.text().await?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| ProviderError::SchemaMismatch(format!("sina page {}: {}", page, e)))?;
        match value {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()),
            other => Err(ProviderError::SchemaMismatch(format!(
                "sina page {}: expected array, got {}",
                page,
                json_type(&other)
            ))),
        }
    }

    /// Every row of the node list, in page order.
    pub async fn list_all(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<Map<String, Value>>, ProviderError> {
        let count = self.stock_count(cancel, timeout).await?;
        if count == 0 {
            return Err(ProviderError::EmptyPayload);
        }
        let pages = count.div_ceil(PAGE_SIZE).min(MAX_PAGES);

        let tasks: Vec<_> = (1..=pages).map(|p| self.fetch_page(p, cancel, timeout)).collect();
        let (results, failed) = self.pool.collect_ok(cancel, tasks).await?;
        if failed > 0 {
            warn!(failed, pages, "Some sina pages failed, list is partial");
        }

        Ok(results.into_iter().flatten().collect())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Sina symbol ("sh600519") for a row, falling back to the bare code.
pub(crate) fn row_symbol(item: &Map<String, Value>) -> Option<String> {
    item.get("symbol")
        .or_else(|| item.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ============================================================================
// Sina Adapter
// ============================================================================

pub struct SinaAdapter {
    nodes: SinaNodeClient,
    priority: u8,
}

impl SinaAdapter {
    pub fn new(nodes: SinaNodeClient, priority: u8) -> Self {
        Self { nodes, priority }
    }

    pub fn from_entry(entry: &DataSourceEntry, pool: WorkerPool) -> Self {
        Self::new(SinaNodeClient::from_entry(entry, pool), entry.priority)
    }
}

#[async_trait]
impl ProviderAdapter for SinaAdapter {
    fn name(&self) -> &str {
        "sina"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> FieldSet {
        FieldSet::BASIC
            .with(Field::TurnoverRate)
            .with(Field::PeRatio)
            .with(Field::MarketCap)
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        let items = self.nodes.list_all(cancel, timeout).await?;
        let rows: Vec<RawRow> = items.iter().filter_map(map_row).collect();
        debug!(rows = rows.len(), "Sina snapshot assembled");
        Ok(RawPayload::new(rows).with_unit(Field::MarketCap, Unit::TenThousandYuan))
    }
}

fn map_row(item: &Map<String, Value>) -> Option<RawRow> {
    let mut row = RawRow::new().with(Field::Code, row_symbol(item)?);
    for (key, field) in COLUMNS {
        if let Some(value) = item.get(*key) {
            row.set(*field, value.clone());
        }
    }
    Some(row)
}
