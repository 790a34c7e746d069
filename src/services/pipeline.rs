use std::fmt;

use chrono::Utc;

use crate::db::notion::{InstrumentSource, ResultSink};
use crate::error::SyncError;
use crate::models::stock::{MarketSnapshot, TechnicalNarrative, TrackedInstrument, UpdateResult};
use crate::services::ai_service::TechnicalNarrator;
use crate::services::fund_flow::CapitalFlowFetcher;
use crate::services::stock_data::{format_ticker, MarketDataProvider};

/// 单行处理状态
#[derive(Debug, Clone, PartialEq)]
pub enum RowState {
    Pending,
    Formatted(String),
    Fetched,
    Narrated,
    Written,
    Done,
    Skipped(String),
    Failed(String),
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowState::Pending => write!(f, "待处理"),
            RowState::Formatted(ticker) => write!(f, "代码就绪 {}", ticker),
            RowState::Fetched => write!(f, "行情/资金已获取"),
            RowState::Narrated => write!(f, "技术面点评完成"),
            RowState::Written => write!(f, "已写回 Notion"),
            RowState::Done => write!(f, "完成"),
            RowState::Skipped(reason) => write!(f, "已跳过：{}", reason),
            RowState::Failed(reason) => write!(f, "处理失败：{}", reason),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub total: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// 顺序处理每一行：格式化 → 行情 → 资金流 → AI 点评 → 回写。
/// 任一行失败只记录日志，不影响后续行。
pub struct Pipeline<'a> {
    source: &'a dyn InstrumentSource,
    market_data: &'a dyn MarketDataProvider,
    capital_flow: &'a CapitalFlowFetcher,
    narrator: TechnicalNarrator<'a>,
    sink: &'a dyn ResultSink,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn InstrumentSource,
        market_data: &'a dyn MarketDataProvider,
        capital_flow: &'a CapitalFlowFetcher,
        narrator: TechnicalNarrator<'a>,
        sink: &'a dyn ResultSink,
    ) -> Self {
        Self {
            source,
            market_data,
            capital_flow,
            narrator,
            sink,
        }
    }

    pub async fn run(&self) -> RunReport {
        log::info!("⏱ 开始抓取：{}", Utc::now().to_rfc3339());
        let instruments = self.source.list_instruments().await;

        let mut report = RunReport {
            total: instruments.len(),
            ..Default::default()
        };

        for inst in &instruments {
            match self.process_row(inst).await {
                RowState::Done => report.done += 1,
                RowState::Skipped(_) => report.skipped += 1,
                _ => report.failed += 1,
            }
        }

        log::info!(
            "✅ 任务完成：共 {} 行，成功 {}，跳过 {}，失败 {}",
            report.total, report.done, report.skipped, report.failed
        );
        report
    }

    fn transition(inst: &TrackedInstrument, state: RowState) -> RowState {
        match &state {
            RowState::Skipped(_) => log::warn!("⚠️ {}({}) {}", inst.display_name, inst.ticker_code, state),
            RowState::Failed(_) => log::error!("❌ {}({}) {}", inst.display_name, inst.ticker_code, state),
            _ => log::info!("{}({}) {}", inst.display_name, inst.ticker_code, state),
        }
        state
    }

    pub async fn process_row(&self, inst: &TrackedInstrument) -> RowState {
        Self::transition(inst, RowState::Pending);

        let ticker = match format_ticker(&inst.ticker_code, &inst.market) {
            Some(t) => t,
            None => {
                let reason = SyncError::UnsupportedTicker {
                    code: inst.ticker_code.clone(),
                    market: inst.market.to_string(),
                };
                return Self::transition(inst, RowState::Skipped(reason.to_string()));
            }
        };
        Self::transition(inst, RowState::Formatted(ticker.clone()));

        let (snapshot, data_error) = match self.market_data.fetch_market_data(&ticker).await {
            Ok(snapshot) => (snapshot, None),
            Err(e) => {
                log::warn!("{}({}) {}", inst.display_name, ticker, e);
                (MarketSnapshot::default(), Some(e.to_string()))
            }
        };
        let capital = self.capital_flow.fetch_capital_flow(&inst.ticker_code, &inst.market).await;
        Self::transition(inst, RowState::Fetched);

        let narrative = match data_error {
            Some(reason) => TechnicalNarrative::Failed(reason),
            None => self.narrator.summarize(&inst.display_name, &inst.ticker_code, &snapshot).await,
        };
        Self::transition(inst, RowState::Narrated);

        let result = UpdateResult {
            price: snapshot.price,
            pe: snapshot.pe,
            pb: snapshot.pb,
            narrative,
            capital_summary: capital,
            updated_at: Utc::now(),
        };

        if let Err(e) = self.sink.write_result(&inst.row_id, &result).await {
            return Self::transition(inst, RowState::Failed(e.to_string()));
        }
        Self::transition(inst, RowState::Written);
        Self::transition(inst, RowState::Done)
    }
}
