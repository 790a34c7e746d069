use serde::{Deserialize, Serialize};
use super::ai::AIConfig;
use crate::error::{SyncError, SyncResult};

const DEFAULT_HISTORY_RANGE: &str = "3mo";

/// 运行配置，启动时从环境变量（及 .env）一次性加载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub notion_token: String,
    pub database_id: String,
    pub ai: AIConfig,
    /// 雅虎 K 线回看区间，如 1mo / 3mo
    pub history_range: String,
    /// 雪球接口 cookie（xq_a_token=...），可选
    pub xueqiu_cookie: Option<String>,
    pub numeric_fill: NumericFill,
}

/// 缺失数值（价格/PE/PB）写回策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NumericFill {
    /// 写 null，保留"未知"语义
    #[default]
    Null,
    /// 兼容旧表：缺失写 0
    Zero,
}

impl Settings {
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 便于测试注入的加载入口
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| SyncError::Config(format!("缺少环境变量 {}", key)))
        };

        let notion_token = required("NOTION_TOKEN")?;
        let database_id = required("DATABASE_ID")?;
        let api_key = required("OPENAI_API_KEY")?;

        uuid::Uuid::parse_str(&database_id)
            .map_err(|e| SyncError::Config(format!("DATABASE_ID 不是合法的 Notion 数据库 ID: {}", e)))?;

        let defaults = AIConfig::default();
        let timeout_secs = match get("AI_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| SyncError::Config(format!("AI_TIMEOUT_SECS 非法: {}", raw)))?;
                if secs == 0 { None } else { Some(secs) }
            }
            None => None,
        };

        let ai = AIConfig {
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key,
            model_name: get("OPENAI_MODEL").unwrap_or(defaults.model_name),
            temperature: defaults.temperature,
            timeout_secs,
        };

        let numeric_fill = match get("FILL_MISSING_WITH_ZERO").as_deref() {
            Some("1") | Some("true") | Some("TRUE") | Some("yes") => NumericFill::Zero,
            _ => NumericFill::Null,
        };

        Ok(Self {
            notion_token,
            database_id,
            ai,
            history_range: get("HISTORY_RANGE").unwrap_or_else(|| DEFAULT_HISTORY_RANGE.to_string()),
            xueqiu_cookie: get("XUEQIU_COOKIE"),
            numeric_fill,
        })
    }
}
