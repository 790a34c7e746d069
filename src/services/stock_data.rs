use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::models::stock::{DailyClose, Market, MarketSnapshot};
use crate::utils::http::build_yahoo_client;
use crate::utils::text::truncate_chars;

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const YAHOO_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const YAHOO_COOKIE_URL: &str = "https://fc.yahoo.com";
const YAHOO_CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
const SUMMARY_MODULES: &str = "summaryDetail,defaultKeyStatistics";

/// 行情数据源：按代码取最新价、PE、PB 与日收盘序列
pub trait MarketDataProvider: Send + Sync {
    fn fetch_market_data<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, SyncResult<MarketSnapshot>>;
}

/// 将 Notion 中的代码+市场转换为雅虎财经代码。
/// HK 补齐（且只补一次）`.HK` 后缀，US 原样返回，其余市场返回 None 表示跳过。
pub fn format_ticker(code: &str, market: &Market) -> Option<String> {
    let code = code.trim();
    if code.is_empty() {
        return None;
    }
    match market {
        Market::HK => {
            let upper = code.to_uppercase();
            match upper.strip_suffix(".HK") {
                Some(base) if !base.is_empty() => Some(format!("{}.HK", base)),
                Some(_) => None,
                None => Some(format!("{}.HK", upper)),
            }
        }
        Market::US => Some(code.to_string()),
        _ => None,
    }
}

/// 雅虎行情：chart 接口取价格与收盘序列，quoteSummary 接口取 PE/PB。
/// quoteSummary 需要 cookie + crumb，crumb 首次使用时获取并缓存，被拒后刷新一次。
pub struct YahooMarketData {
    client: reqwest::Client,
    history_range: String,
    crumb: Mutex<Option<String>>,
}

impl YahooMarketData {
    pub fn new(history_range: &str) -> Result<Self> {
        let client = build_yahoo_client()?;
        Ok(Self {
            client,
            history_range: history_range.to_string(),
            crumb: Mutex::new(None),
        })
    }

    async fn fetch_chart(&self, ticker: &str) -> Result<ChartSummary> {
        let url = format!(
            "{}/{}?range={}&interval=1d",
            YAHOO_CHART_URL,
            urlencoding::encode(ticker),
            self.history_range
        );
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("HTTP {}: {}", status, truncate_chars(&text, 200)));
        }
        parse_chart(&text)
    }

    /// 取缓存的 crumb；`refresh` 为 true 或尚未获取时重新握手
    async fn crumb(&self, refresh: bool) -> Result<String> {
        let mut cached = self.crumb.lock().await;
        if !refresh {
            if let Some(c) = cached.as_ref() {
                return Ok(c.clone());
            }
        }

        // fc.yahoo.com 通常返回 404，但会写入 A3 cookie
        if let Err(e) = self.client.get(YAHOO_COOKIE_URL).send().await {
            log::debug!("雅虎 cookie 请求失败: {}", e);
        }

        let resp = self.client.get(YAHOO_CRUMB_URL).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("crumb 获取失败 HTTP {}", status));
        }
        let crumb = parse_crumb(&text)?;
        *cached = Some(crumb.clone());
        Ok(crumb)
    }

    async fn fetch_valuation(&self, ticker: &str) -> Result<ValuationFields> {
        for attempt in 0..2 {
            let crumb = self.crumb(attempt > 0).await?;
            let url = format!(
                "{}/{}?modules={}&crumb={}",
                YAHOO_SUMMARY_URL,
                urlencoding::encode(ticker),
                SUMMARY_MODULES,
                urlencoding::encode(&crumb)
            );
            let resp = self.client.get(&url).send().await?;
            let status = resp.status();
            let text = resp.text().await?;

            if is_crumb_rejected(status) && attempt == 0 {
                log::debug!("{} crumb 被拒 (HTTP {})，刷新后重试", ticker, status);
                continue;
            }
            if !status.is_success() {
                return Err(anyhow!("HTTP {}: {}", status, truncate_chars(&text, 200)));
            }
            return parse_quote_summary(&text);
        }
        Err(anyhow!("crumb 刷新后仍被拒绝"))
    }
}

impl MarketDataProvider for YahooMarketData {
    fn fetch_market_data<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, SyncResult<MarketSnapshot>> {
        Box::pin(async move {
            let chart = self
                .fetch_chart(ticker)
                .await
                .map_err(|e| SyncError::DataUnavailable(format!("{} K线获取失败: {}", ticker, e)))?;

            if chart.price.is_none() && chart.closes.is_empty() {
                return Err(SyncError::DataUnavailable(format!("{} 无可用行情数据", ticker)));
            }

            // 估值接口失败只影响 PE/PB
            let valuation = match self.fetch_valuation(ticker).await {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("{} 估值数据获取失败，PE/PB 记为未知: {}", ticker, e);
                    ValuationFields::default()
                }
            };

            Ok(MarketSnapshot {
                price: chart.price,
                pe: valuation.pe,
                pb: valuation.pb,
                recent_closes: chart.closes,
            })
        })
    }
}

fn is_crumb_rejected(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// crumb 是一段短的不透明 token；限流页或 HTML 视为失败
fn parse_crumb(text: &str) -> Result<String> {
    let crumb = text.trim();
    if crumb.is_empty()
        || crumb.len() > 64
        || crumb.contains(|c: char| c.is_whitespace() || c == '<' || c == '{')
    {
        return Err(anyhow!("crumb 无效: {}", truncate_chars(crumb, 60)));
    }
    Ok(crumb.to_string())
}

// ====== 雅虎接口响应结构 ======

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    #[serde(rename = "quoteSummary")]
    quote_summary: SummaryResult,
}

#[derive(Debug, Deserialize)]
struct SummaryResult {
    result: Option<Vec<SummaryData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct SummaryData {
    #[serde(rename = "summaryDetail")]
    summary_detail: Option<SummaryDetail>,
    #[serde(rename = "defaultKeyStatistics")]
    key_statistics: Option<KeyStatistics>,
}

#[derive(Debug, Deserialize)]
struct SummaryDetail {
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<YahooNumber>,
}

#[derive(Debug, Deserialize)]
struct KeyStatistics {
    #[serde(rename = "priceToBook")]
    price_to_book: Option<YahooNumber>,
}

/// `{"raw": 28.1, "fmt": "28.10"}`；无数据时为 `{}`，偶尔 raw 为 "Infinity" 字符串
#[derive(Debug, Deserialize)]
struct YahooNumber {
    raw: Option<Value>,
}

impl YahooNumber {
    fn value(&self) -> Option<f64> {
        finite(self.raw.as_ref().and_then(|v| v.as_f64()))
    }
}

#[derive(Debug, Default)]
struct ChartSummary {
    price: Option<f64>,
    closes: Vec<DailyClose>,
}

#[derive(Debug, Default)]
struct ValuationFields {
    pe: Option<f64>,
    pb: Option<f64>,
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn parse_chart(text: &str) -> Result<ChartSummary> {
    let resp: ChartResponse = serde_json::from_str(text)
        .map_err(|e| anyhow!("K线数据解析失败: {}", e))?;

    let data = match resp.chart.result.and_then(|r| r.into_iter().next()) {
        Some(d) => d,
        None => {
            let detail = resp
                .chart
                .error
                .map(|e| format!("{}: {}", e.code.unwrap_or_default(), e.description.unwrap_or_default()))
                .unwrap_or_else(|| "empty result".to_string());
            return Err(anyhow!("雅虎返回错误 {}", detail));
        }
    };

    let price = finite(data.meta.and_then(|m| m.regular_market_price));
    let timestamps = data.timestamp.unwrap_or_default();
    let closes = data
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .map(|q| q.close)
        .unwrap_or_default();

    let mut series = Vec::with_capacity(timestamps.len());
    for (ts, close) in timestamps.iter().zip(closes.iter()) {
        let close = match finite(*close) {
            Some(c) => c,
            None => continue,
        };
        if let Some(dt) = chrono::DateTime::from_timestamp(*ts, 0) {
            series.push(DailyClose {
                date: dt.date_naive(),
                close,
            });
        }
    }

    Ok(ChartSummary { price, closes: series })
}

fn parse_quote_summary(text: &str) -> Result<ValuationFields> {
    let envelope: SummaryEnvelope = serde_json::from_str(text)
        .map_err(|e| anyhow!("估值数据解析失败: {}", e))?;

    let data = match envelope.quote_summary.result.and_then(|r| r.into_iter().next()) {
        Some(d) => d,
        None => {
            let detail = envelope
                .quote_summary
                .error
                .map(|e| format!("{}: {}", e.code.unwrap_or_default(), e.description.unwrap_or_default()))
                .unwrap_or_else(|| "empty result".to_string());
            return Err(anyhow!("估值数据为空 {}", detail));
        }
    };

    Ok(ValuationFields {
        pe: data
            .summary_detail
            .and_then(|d| d.trailing_pe)
            .and_then(|n| n.value()),
        pb: data
            .key_statistics
            .and_then(|k| k.price_to_book)
            .and_then(|n| n.value()),
    })
}
