pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use anyhow::Result;

use db::notion::NotionStore;
use models::settings::Settings;
use services::ai_service::{OpenAIChat, TechnicalNarrator};
use services::fund_flow::CapitalFlowFetcher;
use services::pipeline::{Pipeline, RunReport};
use services::stock_data::YahooMarketData;

/// 构建各数据源客户端并跑完整一轮同步。
/// 返回 Err 仅表示客户端初始化失败，单行错误都已在流程内消化。
pub async fn run(settings: Settings, dry_run: bool) -> Result<RunReport> {
    let store = NotionStore::new(
        &settings.notion_token,
        &settings.database_id,
        settings.numeric_fill,
        dry_run,
    )?;
    let market_data = YahooMarketData::new(&settings.history_range)?;
    let capital_flow = CapitalFlowFetcher::with_default_providers(&settings)?;
    let chat = OpenAIChat::new(&settings.ai)?;
    let narrator = TechnicalNarrator::new(&chat, settings.ai.temperature);

    if dry_run {
        log::info!("dry-run 模式：只抓取与分析，不写回 Notion");
    }

    let pipeline = Pipeline::new(&store, &market_data, &capital_flow, narrator, &store);
    Ok(pipeline.run().await)
}
