use std::future::Future;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{SyncError, SyncResult};
use crate::models::settings::NumericFill;
use crate::models::stock::{Market, TrackedInstrument, UpdateResult};
use crate::utils::http::build_notion_client;
use crate::utils::text::truncate_chars;

const NOTION_API_URL: &str = "https://api.notion.com/v1";
const PAGE_SIZE: u32 = 100;

/// 读取待跟踪标的；数据库不可达时返回空列表并记录错误
pub trait InstrumentSource: Send + Sync {
    fn list_instruments(&self) -> BoxFuture<'_, Vec<TrackedInstrument>>;
}

/// 回写单行结果
pub trait ResultSink: Send + Sync {
    fn write_result<'a>(&'a self, row_id: &'a str, result: &'a UpdateResult) -> BoxFuture<'a, SyncResult<()>>;
}

pub struct NotionStore {
    client: reqwest::Client,
    database_id: String,
    numeric_fill: NumericFill,
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

impl NotionStore {
    pub fn new(token: &str, database_id: &str, numeric_fill: NumericFill, dry_run: bool) -> Result<Self> {
        let client = build_notion_client(token)?;
        Ok(Self {
            client,
            database_id: database_id.to_string(),
            numeric_fill,
            dry_run,
        })
    }

    async fn query_page(&self, cursor: Option<&str>) -> Result<QueryPage> {
        let url = format!("{}/databases/{}/query", NOTION_API_URL, self.database_id);
        let mut body = json!({ "page_size": PAGE_SIZE });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!("Notion 查询失败 ({}): {}", status, truncate_chars(&text, 300)));
        }
        serde_json::from_str(&text).map_err(|e| anyhow!("Notion 查询结果解析失败: {}", e))
    }

    async fn query_all_rows(&self) -> Result<Vec<Value>> {
        collect_pages(|cursor| async move { self.query_page(cursor.as_deref()).await }).await
    }
}

/// 按 next_cursor 翻页。首页失败返回错误；后续页失败时记录日志并保留已取到的行
async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<Value>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<QueryPage>>,
{
    let mut rows = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = match fetch_page(cursor.take()).await {
            Ok(page) => page,
            Err(e) if pages > 0 => {
                log::error!("Notion 第 {} 页查询失败，保留已获取的 {} 行：{}", pages + 1, rows.len(), e);
                break;
            }
            Err(e) => return Err(e),
        };
        pages += 1;
        rows.extend(page.results);
        match (page.has_more, page.next_cursor) {
            (true, Some(next)) => cursor = Some(next),
            _ => break,
        }
    }

    Ok(rows)
}

impl InstrumentSource for NotionStore {
    fn list_instruments(&self) -> BoxFuture<'_, Vec<TrackedInstrument>> {
        Box::pin(async move {
            let rows = match self.query_all_rows().await {
                Ok(rows) => rows,
                Err(e) => {
                    log::error!("获取 Notion 数据失败：{}", e);
                    return vec![];
                }
            };

            let total = rows.len();
            let instruments: Vec<TrackedInstrument> = rows
                .iter()
                .filter_map(|row| match parse_instrument(row) {
                    Ok(inst) => Some(inst),
                    Err(e) => {
                        log::warn!("无法解析某一行股票数据，跳过：{}", e);
                        None
                    }
                })
                .collect();

            log::info!("Notion 共 {} 行，解析成功 {} 行", total, instruments.len());
            instruments
        })
    }
}

impl ResultSink for NotionStore {
    fn write_result<'a>(&'a self, row_id: &'a str, result: &'a UpdateResult) -> BoxFuture<'a, SyncResult<()>> {
        Box::pin(async move {
            let properties = build_properties(result, self.numeric_fill);

            if self.dry_run {
                log::info!("[dry-run] {} 将写入: {}", row_id, properties);
                return Ok(());
            }

            let url = format!("{}/pages/{}", NOTION_API_URL, row_id);
            let resp = self
                .client
                .patch(&url)
                .json(&json!({ "properties": properties }))
                .send()
                .await
                .map_err(|e| SyncError::Write(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(SyncError::Write(format!("HTTP {}: {}", status, truncate_chars(&body, 300))));
            }
            Ok(())
        })
    }
}

// ====== 行解析 / 属性构建 ======

/// 拼接 title / rich_text 片段文本，优先 text.content，回退 plain_text
fn rich_text_content(segments: &Value) -> Option<String> {
    let arr = segments.as_array()?;
    let text: String = arr
        .iter()
        .filter_map(|seg| {
            seg.get("text")
                .and_then(|t| t.get("content"))
                .and_then(|c| c.as_str())
                .or_else(|| seg.get("plain_text").and_then(|p| p.as_str()))
        })
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

pub fn parse_instrument(row: &Value) -> SyncResult<TrackedInstrument> {
    let row_id = row
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::RowParse("缺少 id".to_string()))?
        .to_string();

    let props = row
        .get("properties")
        .ok_or_else(|| SyncError::RowParse(format!("{} 缺少 properties", row_id)))?;

    let display_name = props
        .get("Name")
        .and_then(|p| p.get("title"))
        .and_then(rich_text_content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| SyncError::RowParse(format!("{} 缺少 Name", row_id)))?;

    let ticker_code = props
        .get("code")
        .or_else(|| props.get("Code"))
        .and_then(|p| p.get("rich_text"))
        .and_then(rich_text_content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::RowParse(format!("{}({}) 缺少 code", display_name, row_id)))?;

    let market_label = props
        .get("market")
        .and_then(|p| p.get("select"))
        .and_then(|s| s.get("name"))
        .and_then(|n| n.as_str())
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SyncError::RowParse(format!("{}({}) 缺少 market", display_name, row_id)))?;

    Ok(TrackedInstrument {
        row_id,
        display_name,
        ticker_code,
        market: Market::from_label(&market_label),
    })
}

fn number_value(v: Option<f64>, fill: NumericFill) -> Value {
    match (v, fill) {
        (Some(v), _) => json!(v),
        (None, NumericFill::Zero) => json!(0),
        (None, NumericFill::Null) => Value::Null,
    }
}

fn rich_text_value(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

pub fn build_properties(result: &UpdateResult, fill: NumericFill) -> Value {
    json!({
        "Price": { "number": number_value(result.price, fill) },
        "PE": { "number": number_value(result.pe, fill) },
        "PB": { "number": number_value(result.pb, fill) },
        "Tech Analysis": { "rich_text": rich_text_value(&result.narrative.display_text()) },
        "Capital Flow": { "rich_text": rich_text_value(&result.capital_summary.display_text()) },
        "Update Status": { "checkbox": true },
        "Last Updated": { "date": { "start": result.updated_at.to_rfc3339() } },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stock::{CapitalFlowSummary, TechnicalNarrative, MAX_TEXT_CHARS};
    use chrono::{TimeZone, Utc};

    fn row(name: &str, code_key: &str, code: &str, market: &str) -> Value {
        json!({
            "object": "page",
            "id": "1a2b3c4d-0000-4000-8000-000000000001",
            "properties": {
                "Name": { "type": "title", "title": [{ "type": "text", "text": { "content": name }, "plain_text": name }] },
                code_key: { "type": "rich_text", "rich_text": [{ "type": "text", "text": { "content": code } }] },
                "market": { "type": "select", "select": { "name": market } }
            }
        })
    }

    #[test]
    fn test_parse_instrument_normalizes() {
        let inst = parse_instrument(&row("腾讯控股", "code", " 0700 ", " hk ")).unwrap();
        assert_eq!(inst.display_name, "腾讯控股");
        assert_eq!(inst.ticker_code, "0700");
        assert_eq!(inst.market, Market::HK);
        assert_eq!(inst.row_id, "1a2b3c4d-0000-4000-8000-000000000001");
    }

    #[test]
    fn test_parse_instrument_accepts_capital_code() {
        let inst = parse_instrument(&row("ACME", "Code", "AAPL", "US")).unwrap();
        assert_eq!(inst.ticker_code, "AAPL");
    }

    #[test]
    fn test_parse_instrument_plain_text_fallback() {
        let mut r = row("ACME", "code", "AAPL", "US");
        r["properties"]["code"]["rich_text"] = json!([{ "plain_text": "MSFT" }]);
        assert_eq!(parse_instrument(&r).unwrap().ticker_code, "MSFT");
    }

    #[test]
    fn test_parse_instrument_rejects_malformed() {
        let mut empty_code = row("ACME", "code", "AAPL", "US");
        empty_code["properties"]["code"]["rich_text"] = json!([]);
        assert!(matches!(parse_instrument(&empty_code), Err(SyncError::RowParse(_))));

        let mut no_market = row("ACME", "code", "AAPL", "US");
        no_market["properties"]["market"]["select"] = Value::Null;
        assert!(matches!(parse_instrument(&no_market), Err(SyncError::RowParse(_))));

        let blank_code = row("ACME", "code", "   ", "US");
        assert!(parse_instrument(&blank_code).is_err());

        assert!(parse_instrument(&json!({ "id": "x" })).is_err());
    }

    fn sample_result(price: Option<f64>) -> UpdateResult {
        UpdateResult {
            price,
            pe: Some(15.0),
            pb: None,
            narrative: TechnicalNarrative::Text("多".repeat(3000)),
            capital_summary: CapitalFlowSummary::Available("主力净流入 1.00 万元".into()),
            updated_at: Utc.with_ymd_and_hms(2024, 6, 3, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_build_properties_shape() {
        let props = build_properties(&sample_result(Some(100.0)), NumericFill::Null);
        assert_eq!(props["Price"]["number"], json!(100.0));
        assert_eq!(props["PE"]["number"], json!(15.0));
        assert!(props["PB"]["number"].is_null());
        assert_eq!(props["Update Status"]["checkbox"], json!(true));
        assert_eq!(props["Last Updated"]["date"]["start"], json!("2024-06-03T08:30:00+00:00"));
        assert_eq!(props["Capital Flow"]["rich_text"][0]["text"]["content"], json!("主力净流入 1.00 万元"));

        let tech = props["Tech Analysis"]["rich_text"][0]["text"]["content"].as_str().unwrap();
        assert_eq!(tech.chars().count(), MAX_TEXT_CHARS);
    }

    fn page(ids: &[&str], next: Option<&str>) -> QueryPage {
        QueryPage {
            results: ids.iter().map(|id| json!({ "id": id })).collect(),
            has_more: next.is_some(),
            next_cursor: next.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_collect_pages_follows_cursor() {
        let mut cursors = Vec::new();
        let rows = collect_pages(|cursor| {
            cursors.push(cursor.clone());
            let reply = match cursor.as_deref() {
                None => page(&["a", "b"], Some("c1")),
                _ => page(&["c"], None),
            };
            async move { Ok::<_, anyhow::Error>(reply) }
        })
        .await
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(cursors, vec![None, Some("c1".to_string())]);
    }

    #[tokio::test]
    async fn test_collect_pages_keeps_rows_when_later_page_fails() {
        let rows = collect_pages(|cursor| async move {
            match cursor {
                None => Ok(page(&["a", "b"], Some("c1"))),
                Some(_) => Err(anyhow!("Notion 查询失败 (502 Bad Gateway)")),
            }
        })
        .await
        .unwrap();
        let ids: Vec<&str> = rows.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_collect_pages_first_page_failure_is_error() {
        let result = collect_pages(|_cursor| async move {
            Err::<QueryPage, _>(anyhow!("Notion 查询失败 (401 Unauthorized)"))
        })
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_build_properties_zero_fill() {
        let props = build_properties(&sample_result(None), NumericFill::Zero);
        assert_eq!(props["Price"]["number"], json!(0));
        assert_eq!(props["PB"]["number"], json!(0));
        assert_eq!(props["PE"]["number"], json!(15.0));
    }
}
