//! 错误定义模块

use thiserror::Error;

/// 门诊排队系统统一错误类型
#[derive(Error, Debug)]
pub enum OpdError {
    #[error("冲突: {0}")]
    Conflict(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("队列为空: {0}")]
    QueueEmpty(String),

    #[error("无效状态转换: 无法在 {status} 状态下执行 {action}")]
    InvalidState { status: String, action: String },

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OpdError {
    /// 对外暴露的稳定错误码，前台界面据此区分处理
    pub fn code(&self) -> &'static str {
        match self {
            OpdError::Conflict(_) => "ASSIGNMENT_CONFLICT",
            OpdError::NotFound(_) => "ASSIGNMENT_NOT_FOUND",
            OpdError::QueueEmpty(_) => "QUEUE_EMPTY",
            OpdError::InvalidState { .. } => "INVALID_STATE",
            OpdError::Validation(_) => "VALIDATION_FAILED",
            OpdError::Database(_) | OpdError::Io(_) => "STORE_FAILURE",
            OpdError::Config(_) => "CONFIG_ERROR",
            OpdError::Internal(_) | OpdError::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否属于"未找到"类错误（包含空队列）
    pub fn is_not_found(&self) -> bool {
        matches!(self, OpdError::NotFound(_) | OpdError::QueueEmpty(_))
    }

    /// 构造状态转换错误
    pub fn invalid_state(status: impl ToString, action: impl ToString) -> Self {
        OpdError::InvalidState {
            status: status.to_string(),
            action: action.to_string(),
        }
    }
}

/// 门诊排队系统统一结果类型
pub type Result<T> = std::result::Result<T, OpdError>;
