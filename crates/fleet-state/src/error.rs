use thiserror::Error;

/// 状态聚合端错误类型
#[derive(Error, Debug)]
pub enum StateError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 审计写入队列错误
    #[error("Audit queue error: {0}")]
    AuditQueue(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, StateError>;
