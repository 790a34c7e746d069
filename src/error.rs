use thiserror::Error;

/// 同步流程错误分类。
/// 只有 `Config` 会终止进程，其余均在单行范围内被捕获并记录。
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("行数据解析失败: {0}")]
    RowParse(String),

    #[error("不支持的代码/市场组合: {code} ({market})")]
    UnsupportedTicker { code: String, market: String },

    #[error("行情数据不可用: {0}")]
    DataUnavailable(String),

    #[error("大模型调用失败: {0}")]
    Narration(String),

    #[error("写入 Notion 失败: {0}")]
    Write(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
