pub mod ai_service;
pub mod fund_flow;
pub mod pipeline;
pub mod stock_data;
pub mod technical_indicators;
