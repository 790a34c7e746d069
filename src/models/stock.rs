use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::text::truncate_chars;

/// Notion 富文本字段写入上限（官方限制 2000，留余量）
pub const MAX_TEXT_CHARS: usize = 1900;

/// 历史数据不足时的固定提示
pub const INSUFFICIENT_HISTORY_TEXT: &str = "📉 历史数据不足";

/// 标的所属市场
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Market {
    US,
    HK,
    /// 沪深A股
    CN,
    Other(String),
}

impl Market {
    /// 解析 Notion select 标签（已 trim + 大写）
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_uppercase();
        match label.as_str() {
            "US" => Market::US,
            "HK" => Market::HK,
            "CN" | "A" | "SH" | "SZ" => Market::CN,
            _ => Market::Other(label),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::US => write!(f, "US"),
            Market::HK => write!(f, "HK"),
            Market::CN => write!(f, "CN"),
            Market::Other(label) => write!(f, "{}", label),
        }
    }
}

/// 数据库中跟踪的一只股票（一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedInstrument {
    pub row_id: String,
    pub display_name: String,
    pub ticker_code: String,
    pub market: Market,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

/// 单次运行内的行情快照，不落地
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price: Option<f64>,
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    /// 按日期升序
    pub recent_closes: Vec<DailyClose>,
}

impl MarketSnapshot {
    pub fn closes(&self) -> Vec<f64> {
        self.recent_closes.iter().map(|c| c.close).collect()
    }
}

/// 资金流结果：成功时为已格式化的展示文本，失败时带原因
#[derive(Debug, Clone, PartialEq)]
pub enum CapitalFlowSummary {
    Available(String),
    Unavailable(String),
}

impl CapitalFlowSummary {
    pub fn is_available(&self) -> bool {
        matches!(self, CapitalFlowSummary::Available(_))
    }

    /// 写入 Notion 的展示文本
    pub fn display_text(&self) -> String {
        let text = match self {
            CapitalFlowSummary::Available(text) => text.clone(),
            CapitalFlowSummary::Unavailable(reason) => format!("资金流抓取失败：{}", reason),
        };
        truncate_chars(&text, MAX_TEXT_CHARS)
    }
}

/// AI 技术面点评结果
#[derive(Debug, Clone, PartialEq)]
pub enum TechnicalNarrative {
    Text(String),
    InsufficientHistory,
    Failed(String),
}

impl TechnicalNarrative {
    pub fn display_text(&self) -> String {
        let text = match self {
            TechnicalNarrative::Text(text) => text.clone(),
            TechnicalNarrative::InsufficientHistory => INSUFFICIENT_HISTORY_TEXT.to_string(),
            TechnicalNarrative::Failed(reason) => format!("GPT 分析失败：{}", reason),
        };
        truncate_chars(&text, MAX_TEXT_CHARS)
    }
}

/// 回写到 Notion 的一行结果
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub price: Option<f64>,
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub narrative: TechnicalNarrative,
    pub capital_summary: CapitalFlowSummary,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_from_label() {
        assert_eq!(Market::from_label(" hk "), Market::HK);
        assert_eq!(Market::from_label("us"), Market::US);
        assert_eq!(Market::from_label("SZ"), Market::CN);
        assert_eq!(Market::from_label("jp"), Market::Other("JP".to_string()));
        assert_eq!(Market::Other("JP".to_string()).to_string(), "JP");
    }

    #[test]
    fn test_display_text_is_bounded() {
        let long = "涨".repeat(5000);
        let narrative = TechnicalNarrative::Text(long.clone());
        assert_eq!(narrative.display_text().chars().count(), MAX_TEXT_CHARS);

        let flow = CapitalFlowSummary::Unavailable(long);
        assert_eq!(flow.display_text().chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(TechnicalNarrative::InsufficientHistory.display_text(), INSUFFICIENT_HISTORY_TEXT);
        assert!(TechnicalNarrative::Failed("timeout".into()).display_text().contains("timeout"));
        assert!(!CapitalFlowSummary::Unavailable("x".into()).is_available());
    }
}
