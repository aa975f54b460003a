//! Combined Sina list + Tencent quote adapter.
//!
//! Sina supplies the symbol universe; Tencent's `qt.gtimg.cn` batch quote
//! endpoint supplies the full quote for 80 symbols per request, including
//! volume ratio and exchange limit prices. Both legs are rate limited.

use async_trait::async_trait;
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
use super::sina::{row_symbol, SinaNodeClient, DEFAULT_SINA_RPM};

// ============================================================================
// Constants
// ============================================================================

const TENCENT_BASE_URL: &str = "https://qt.gtimg.cn";

const SINA_BASE_URL: &str = "https://vip.stock.finance.sina.com.cn/quotes_service/api/json_v2.php";

/// Symbols per quote request
pub const BATCH_SIZE: usize = 80;

const DEFAULT_TENCENT_RPM: u32 = 600;

/// Positions in the `~`-separated quote record
const COLUMNS: &[(usize, Field)] = &[
    (1, Field::Name),
    (3, Field::Price),
    (4, Field::PrevClose),
    (6, Field::Volume),
    (32, Field::ChangePct),
    (33, Field::High),
    (34, Field::Low),
    (37, Field::Amount),
    (38, Field::TurnoverRate),
    (39, Field::PeRatio),
    (43, Field::Amplitude),
    (45, Field::MarketCap),
    (47, Field::LimitUpPrice),
    (48, Field::LimitDownPrice),
    (49, Field::VolumeRatio),
];

// ============================================================================
// Sina + Tencent Adapter
// ============================================================================

pub struct SinaTencentAdapter {
    nodes: SinaNodeClient,
    client: reqwest::Client,
    quote_base_url: String,
    limiter: Arc<RateLimiter>,
    pool: WorkerPool,
    priority: u8,
}

impl SinaTencentAdapter {
    pub fn new(
        nodes: SinaNodeClient,
        quote_base_url: impl Into<String>,
        requests_per_minute: u32,
        pool: WorkerPool,
        priority: u8,
    ) -> Self {
        Self {
            nodes,
            client: http_client(),
            quote_base_url: quote_base_url.into().trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::new("tencent", requests_per_minute)),
            pool,
            priority,
        }
    }

    /// `base_url` and `requests_per_minute` apply to the Tencent quote leg;
    /// the Sina list keeps its public endpoint and takes
    /// `list_requests_per_minute`.
    pub fn from_entry(entry: &DataSourceEntry, pool: WorkerPool) -> Self {
        let nodes = SinaNodeClient::new(
            SINA_BASE_URL,
            entry.list_requests_per_minute.unwrap_or(DEFAULT_SINA_RPM),
            pool,
        );
        Self::new(
            nodes,
            entry.base_url.as_deref().unwrap_or(TENCENT_BASE_URL),
            entry.requests_per_minute.unwrap_or(DEFAULT_TENCENT_RPM),
            pool,
            entry.priority,
        )
    }

    async fn fetch_batch(
        &self,
        symbols: &[String],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<RawRow>, ProviderError> {
        self.limiter.acquire(cancel).await?;
        let url = format!("{}/q={}", self.quote_base_url, symbols.join(","));

        let response = self.client.get(&url).timeout(timeout).send().await?;
        // Upstream declares GBK; reqwest decodes by the declared charset
        let body = check_status(response)?.text().await?;

        Ok(parse_quotes(&body))
    }
}

#[async_trait]
impl ProviderAdapter for SinaTencentAdapter {
    fn name(&self) -> &str {
        "sina+tencent"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> FieldSet {
        FieldSet::FULL.without(Field::Change60d)
    }

    async fn fetch_snapshot(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        let universe: Vec<String> = self
            .nodes
            .list_all(cancel, timeout)
            .await?
            .iter()
            .filter_map(row_symbol)
            .filter(|s| s.starts_with("sh") || s.starts_with("sz") || s.starts_with("bj"))
            .collect();

        if universe.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }

        let batches: Vec<&[String]> = universe.chunks(BATCH_SIZE).collect();
        debug!(symbols = universe.len(), batches = batches.len(), "Fetching tencent quotes");

        let tasks: Vec<_> = batches
            .iter()
            .copied()
            .map(|batch| self.fetch_batch(batch, cancel, timeout))
            .collect();
        let (results, failed) = self.pool.collect_ok(cancel, tasks).await?;
        if failed > 0 {
            warn!(failed, batches = batches.len(), "Some tencent batches failed, snapshot is partial");
        }

        let rows: Vec<RawRow> = results.into_iter().flatten().collect();
        Ok(RawPayload::new(rows)
            .with_unit(Field::Amount, Unit::TenThousandYuan)
            .with_unit(Field::MarketCap, Unit::HundredMillionYuan))
    }
}

/// Parse a `v_sh600519="1~name~600519~...";` response body.
pub fn parse_quotes(body: &str) -> Vec<RawRow> {
    body.split(';')
        .filter_map(|record| {
            let record = record.trim();
            let (var, value) = record.split_once('=')?;
            let symbol = var.trim().strip_prefix("v_")?;
            let value = value.trim().trim_matches('"');
            if value.is_empty() {
                return None;
            }

            let parts: Vec<&str> = value.split('~').collect();
            let mut row = RawRow::new().with(Field::Code, symbol.to_string());
            for (index, field) in COLUMNS {
                if let Some(part) = parts.get(*index) {
                    row.set(*field, part.to_string());
                }
            }
            Some(row)
        })
        .collect()
}
