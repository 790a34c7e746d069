use anyhow::{anyhow, Result};
use futures::future::BoxFuture;

use crate::error::{SyncError, SyncResult};
use crate::models::ai::*;
use crate::models::stock::{MarketSnapshot, TechnicalNarrative, MAX_TEXT_CHARS};
use crate::services::technical_indicators::{compute_trend, TrendIndicators, MIN_HISTORY};
use crate::utils::http::build_ai_client;
use crate::utils::text::truncate_chars;

const SYSTEM_PROMPT: &str = "你是专业的股票技术分析师";

/// 单轮对话补全接口
pub trait ChatModel: Send + Sync {
    fn complete<'a>(&'a self, messages: Vec<ChatMessage>, temperature: f64) -> BoxFuture<'a, Result<String>>;
}

/// OpenAI 兼容的 /chat/completions 客户端
pub struct OpenAIChat {
    client: reqwest::Client,
    config: AIConfig,
}

impl OpenAIChat {
    pub fn new(config: &AIConfig) -> Result<Self> {
        let client = build_ai_client(config.timeout_secs)?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

impl ChatModel for OpenAIChat {
    fn complete<'a>(&'a self, messages: Vec<ChatMessage>, temperature: f64) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let req = ChatCompletionRequest {
                model: self.config.model_name.clone(),
                messages,
                max_tokens: None,
                temperature: Some(temperature),
                stream: Some(false),
            };

            let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .header("Content-Type", "application/json")
                .json(&req)
                .send()
                .await?;

            let status = resp.status();
            let body = resp.text().await?;

            if !status.is_success() {
                return Err(anyhow!("AI API error ({}): {}", status, truncate_chars(&body, 200)));
            }

            let response: ChatCompletionResponse = serde_json::from_str(&body)
                .map_err(|e| anyhow!("AI response parse error: {} body: {}", e, truncate_chars(&body, 200)))?;

            if let Some(usage) = &response.usage {
                log::debug!(
                    "AI token 用量: prompt={} completion={} total={}",
                    usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                );
            }

            response
                .first_content()
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("AI 返回空 choices"))
        })
    }
}

/// 技术面点评：均线/MACD 指标 + 大模型一句话总结
pub struct TechnicalNarrator<'a> {
    model: &'a dyn ChatModel,
    temperature: f64,
}

impl<'a> TechnicalNarrator<'a> {
    pub fn new(model: &'a dyn ChatModel, temperature: f64) -> Self {
        Self { model, temperature }
    }

    /// 失败不外抛：历史不足返回固定提示，其余错误折叠为 `Failed`
    pub async fn summarize(&self, name: &str, code: &str, snapshot: &MarketSnapshot) -> TechnicalNarrative {
        let closes = snapshot.closes();
        if closes.len() < MIN_HISTORY {
            log::info!("{}({}) 收盘价仅 {} 条，跳过 AI 点评", name, code, closes.len());
            return TechnicalNarrative::InsufficientHistory;
        }

        let trend = match compute_trend(&closes) {
            Some(t) => t,
            None => {
                return TechnicalNarrative::Failed(SyncError::Narration("指标计算异常".to_string()).to_string())
            }
        };

        let prompt = build_prompt(name, code, &trend);
        match self.request_narrative(&prompt).await {
            Ok(text) => TechnicalNarrative::Text(text),
            Err(e) => {
                log::warn!("{}({}) AI 点评失败: {}", name, code, e);
                TechnicalNarrative::Failed(e.to_string())
            }
        }
    }

    async fn request_narrative(&self, prompt: &str) -> SyncResult<String> {
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let content = self
            .model
            .complete(messages, self.temperature)
            .await
            .map_err(|e| SyncError::Narration(e.to_string()))?;

        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::Narration("AI 返回内容为空".to_string()));
        }
        Ok(truncate_chars(content, MAX_TEXT_CHARS))
    }
}

pub fn build_prompt(name: &str, code: &str, trend: &TrendIndicators) -> String {
    let hist = trend
        .macd_hist_recent
        .iter()
        .map(|v| format!("{:.2}", v))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "请分析以下股票的技术面情况，简洁总结当前趋势，并说明是否处于低买区：\n\
        \n\
        股票名称：{}\n\
        股票代码：{}\n\
        当前价格：{:.2}\n\
        5日均线：{:.2}\n\
        20日均线：{:.2}\n\
        MACD最近3日：[{}]\n\
        \n\
        用一到两句简洁语言描述趋势：如“MACD金叉，短线上涨趋势明显”或“跌破20日线，建议观望”。",
        name, code, trend.current, trend.ma5, trend.ma20, hist
    )
}
