//! Tushare Pro adapter (premium, token required).
//!
//! # API Documentation
//! https://tushare.pro/document/2
//!
//! A snapshot is assembled from end-of-day tables for the latest trade
//! date: `daily` for prices, `daily_basic` for turnover / volume ratio /
//! PE / market cap, `stock_basic` for names and `stk_limit` for limit
//! prices. The last three are independent and go through the worker pool.
//!
//! # Rate Limits
//! - Basic: 200 requests/minute

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use marketscan_common::DataSourceEntry;

use super::fields::{Field, FieldSet};
use super::pool::WorkerPool;
use super::provider::{check_status, http_client, ProviderAdapter, ProviderError, RawPayload, RawRow, Unit};
use super::shanghai_today;

const TUSHARE_API_URL: &str = "http://api.tushare.pro";

/// Trade dates tried before giving up (today's table may not be published yet)
const TRADE_DATES_TRIED: usize = 2;

/// Calendar lookback to find recent trade dates
const CALENDAR_LOOKBACK_DAYS: i64 = 20;

// ============================================================================
// Tushare Adapter
// ============================================================================

pub struct TushareAdapter {
    token: String,
    client: reqwest::Client,
    base_url: String,
    priority: u8,
    pool: WorkerPool,
}

impl TushareAdapter {
    pub fn new(token: impl Into<String>, pool: WorkerPool) -> Self {
        Self::with_base_url(token, TUSHARE_API_URL, 0, pool)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
        priority: u8,
        pool: WorkerPool,
    ) -> Self {
        Self {
            token: token.into(),
            client: http_client(),
            base_url: base_url.into(),
            priority,
            pool,
        }
    }

    pub fn from_entry(entry: &DataSourceEntry, token: &str, pool: WorkerPool) -> Self {
        Self::with_base_url(
            token,
            entry.base_url.as_deref().unwrap_or(TUSHARE_API_URL),
            entry.priority,
            pool,
        )
    }

    /// Call one Tushare API and return its table.
    async fn call_api(
        &self,
        api_name: &str,
        params: HashMap<&str, String>,
        fields: &[&str],
        timeout: Duration,
    ) -> Result<TushareTable, ProviderError> {
        let request = TushareRequest {
            api_name,
            token: &self.token,
            params,
            fields: fields.join(","),
        };

        debug!(api = api_name, "Calling tushare");

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .timeout(timeout)
            .send()
            .await?;

        let result: TushareResponse = check_status(response)?.json().await?;

        match result.code {
            0 => Ok(result.data.unwrap_or_default()),
            40001 | 40101 => Err(ProviderError::Auth(result.msg.unwrap_or_default())),
            40203 => Err(ProviderError::RateLimited {
                retry_after_secs: Some(60),
            }),
            code => Err(ProviderError::Network(format!(
                "tushare {} returned {}: {}",
                api_name,
                code,
                result.msg.unwrap_or_default()
            ))),
        }
    }

    /// Open trade dates, newest first.
    async fn recent_trade_dates(&self, timeout: Duration) -> Result<Vec<String>, ProviderError> {
        let today = shanghai_today();
        let start = today - ChronoDuration::days(CALENDAR_LOOKBACK_DAYS);

        let params = HashMap::from([
            ("exchange", "SSE".to_string()),
            ("start_date", yyyymmdd(start)),
            ("end_date", yyyymmdd(today)),
            ("is_open", "1".to_string()),
        ]);
        let table = self
            .call_api("trade_cal", params, &["cal_date", "is_open"], timeout)
            .await?;

        let mut dates: Vec<String> = table
            .rows()
            .filter_map(|row| row.get("cal_date").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.dedup();
        Ok(dates)
    }

    fn table_task<'a>(
        &'a self,
        api_name: &'a str,
        params: HashMap<&'a str, String>,
        fields: &'a [&'a str],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<TushareTable, ProviderError>> {
        self.call_api(api_name, params, fields, timeout).boxed()
    }
}

#[async_trait]
impl ProviderAdapter for TushareAdapter {
    fn name(&self) -> &str {
        "tushare"
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
        let dates = self.recent_trade_dates(timeout).await?;

        let mut found = None;
        for date in dates.into_iter().take(TRADE_DATES_TRIED) {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let params = HashMap::from([("trade_date", date.clone())]);
            let daily = self
                .call_api(
                    "daily",
                    params,
                    &["ts_code", "close", "pre_close", "pct_chg", "high", "low", "vol", "amount"],
                    timeout,
                )
                .await?;
            if !daily.items.is_empty() {
                found = Some((date, daily));
                break;
            }
            debug!(trade_date = %date, "No daily rows yet, trying previous trade date");
        }
        let (trade_date, daily) = found.ok_or(ProviderError::EmptyPayload)?;

        let basic_fields = ["ts_code", "turnover_rate", "volume_ratio", "pe_ttm", "total_mv"];
        let name_fields = ["ts_code", "name"];
        let limit_fields = ["ts_code", "up_limit", "down_limit"];
        let tasks = vec![
            self.table_task(
                "daily_basic",
                HashMap::from([("trade_date", trade_date.clone())]),
                &basic_fields,
                timeout,
            ),
            self.table_task(
                "stock_basic",
                HashMap::from([("list_status", "L".to_string())]),
                &name_fields,
                timeout,
            ),
            self.table_task(
                "stk_limit",
                HashMap::from([("trade_date", trade_date.clone())]),
                &limit_fields,
                timeout,
            ),
        ];

        let mut tables = self.pool.run_all(cancel, tasks).await?.into_iter();
        let mut side_table = |api: &str| match tables.next() {
            Some(Ok(table)) => table.index_by("ts_code"),
            Some(Err(e)) => {
                warn!(api, error = %e, "Tushare side table failed, fields left unknown");
                HashMap::new()
            }
            None => HashMap::new(),
        };
        let basic = side_table("daily_basic");
        let names = side_table("stock_basic");
        let limits = side_table("stk_limit");

        let rows: Vec<RawRow> = daily
            .rows()
            .filter_map(|d| {
                let code = d.get("ts_code")?.as_str()?.to_string();
                let mut row = RawRow::new().with(Field::Code, code.clone());
                for (key, field) in [
                    ("close", Field::Price),
                    ("pre_close", Field::PrevClose),
                    ("pct_chg", Field::ChangePct),
                    ("high", Field::High),
                    ("low", Field::Low),
                    ("vol", Field::Volume),
                    ("amount", Field::Amount),
                ] {
                    copy(&d, key, &mut row, field);
                }
                if let Some(b) = basic.get(&code) {
                    copy(b, "turnover_rate", &mut row, Field::TurnoverRate);
                    copy(b, "volume_ratio", &mut row, Field::VolumeRatio);
                    copy(b, "pe_ttm", &mut row, Field::PeRatio);
                    copy(b, "total_mv", &mut row, Field::MarketCap);
                }
                if let Some(n) = names.get(&code) {
                    copy(n, "name", &mut row, Field::Name);
                }
                if let Some(l) = limits.get(&code) {
                    copy(l, "up_limit", &mut row, Field::LimitUpPrice);
                    copy(l, "down_limit", &mut row, Field::LimitDownPrice);
                }
                Some(row)
            })
            .collect();

        debug!(trade_date = %trade_date, rows = rows.len(), "Tushare snapshot assembled");

        Ok(RawPayload::new(rows)
            .with_unit(Field::Amount, Unit::ThousandYuan)
            .with_unit(Field::MarketCap, Unit::TenThousandYuan))
    }
}

fn copy(source: &HashMap<String, Value>, key: &str, row: &mut RawRow, field: Field) {
    if let Some(value) = source.get(key) {
        if !value.is_null() {
            row.set(field, value.clone());
        }
    }
}

fn yyyymmdd(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct TushareRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: HashMap<&'a str, String>,
    fields: String,
}

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    msg: Option<String>,
    data: Option<TushareTable>,
}

/// Column-oriented table as returned by every Tushare API.
#[derive(Debug, Default, Deserialize)]
struct TushareTable {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

impl TushareTable {
    fn rows(&self) -> impl Iterator<Item = HashMap<String, Value>> + '_ {
        self.items.iter().map(|item| {
            self.fields
                .iter()
                .cloned()
                .zip(item.iter().cloned())
                .collect()
        })
    }

    fn index_by(&self, key: &str) -> HashMap<String, HashMap<String, Value>> {
        self.rows()
            .filter_map(|row| {
                let k = row.get(key)?.as_str()?.to_string();
                Some((k, row))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_rows_and_index() {
        let table: TushareTable = serde_json::from_value(json!({
            "fields": ["ts_code", "name"],
            "items": [["600519.SH", "贵州茅台"], ["000001.SZ", "平安银行"]]
        }))
        .unwrap();
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], json!("平安银行"));

        let index = table.index_by("ts_code");
        assert_eq!(index["600519.SH"]["name"], json!("贵州茅台"));
    }

    #[test]
    fn test_request_serialization() {
        let request = TushareRequest {
            api_name: "daily",
            token: "t",
            params: HashMap::from([("trade_date", "20240105".to_string())]),
            fields: ["ts_code", "close"].join(","),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["api_name"], "daily");
        assert_eq!(value["params"]["trade_date"], "20240105");
        assert_eq!(value["fields"], "ts_code,close");
    }

    #[test]
    fn test_capabilities() {
        let adapter = TushareAdapter::new("token", WorkerPool::default());
        assert_eq!(adapter.priority(), 0);
        assert!(adapter.capabilities().contains(Field::VolumeRatio));
        assert!(!adapter.capabilities().contains(Field::Change60d));
    }
}
