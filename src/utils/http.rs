use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, REFERER, USER_AGENT};
use std::time::Duration;

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 抓取类接口统一超时，限制整轮运行时间
pub const SCRAPE_TIMEOUT_SECS: u64 = 10;

pub const NOTION_VERSION: &str = "2022-06-28";

/// 东方财富行情 HTTP client
pub fn build_stock_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(REFERER, HeaderValue::from_static("https://quote.eastmoney.com/"));

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(SCRAPE_TIMEOUT_SECS))
        .gzip(true)
        .build()?;
    Ok(client)
}

/// AI 接口 client；timeout 为 None 时不设超时
pub fn build_ai_client(timeout_secs: Option<u64>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

/// 腾讯财经 HTTP client（港股大单资金）
pub fn build_qq_finance_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(REFERER, HeaderValue::from_static("https://stockapp.finance.qq.com/mstats"));

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(SCRAPE_TIMEOUT_SECS))
        .gzip(true)
        .build()?;
    Ok(client)
}

/// 雪球 HTTP client（美股资金流），cookie 缺省时用演示 token
pub fn build_xueqiu_client(cookie: Option<&str>) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(REFERER, HeaderValue::from_static("https://xueqiu.com"));
    let cookie = HeaderValue::from_str(cookie.unwrap_or("xq_a_token=demo"))
        .map_err(|e| anyhow!("XUEQIU_COOKIE 含非法字符: {}", e))?;
    headers.insert(COOKIE, cookie);

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(SCRAPE_TIMEOUT_SECS))
        .gzip(true)
        .build()?;
    Ok(client)
}

/// 雅虎财经 HTTP client（价格/PE/PB/日K），开启 cookie 以完成 crumb 握手
pub fn build_yahoo_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(SCRAPE_TIMEOUT_SECS))
        .gzip(true)
        .cookie_store(true)
        .build()?;
    Ok(client)
}

/// Notion API client，鉴权与版本头固定在 default headers 中
pub fn build_notion_client(token: &str) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| anyhow!("NOTION_TOKEN 含非法字符: {}", e))?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(HeaderName::from_static("notion-version"), HeaderValue::from_static(NOTION_VERSION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(30))
        .gzip(true)
        .build()?;
    Ok(client)
}
