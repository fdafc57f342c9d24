//! 错误类型
//!
//! 绑定流程里的所有失败最终都会降级为一条发给用户的消息，
//! 不允许任何错误终止宿主进程。

use thiserror::Error;

/// 登录/二维码上游服务错误
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("上游请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("上游返回异常状态码: {0}")]
    Status(u16),

    #[error("上游响应无法解析: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ApiError::Malformed(msg.into())
    }
}

/// 绑定业务错误
#[derive(Debug, Error)]
pub enum BindError {
    #[error("已绑定 QQ {qq_number}")]
    AlreadyBound { qq_number: String },

    #[error("未绑定")]
    NotBound,

    #[error("登录服务不可用: {0}")]
    UpstreamUnavailable(#[from] ApiError),

    #[error("QQ {qq_number} 已被 {owner} 绑定")]
    Conflict { qq_number: String, owner: String },

    #[error("无效的 QQ 号: {0}")]
    InvalidAccount(String),

    #[error("权限不足")]
    Unauthorized,
}

/// 独占绑定被拒绝的原因
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExclusiveBindError {
    #[error("{caller_id} 已绑定 QQ {qq_number}")]
    CallerBound { caller_id: String, qq_number: String },

    #[error("QQ {qq_number} 已被 {owner} 绑定")]
    AccountTaken { qq_number: String, owner: String },
}

impl From<ExclusiveBindError> for BindError {
    fn from(e: ExclusiveBindError) -> Self {
        match e {
            ExclusiveBindError::CallerBound { qq_number, .. } => BindError::AlreadyBound { qq_number },
            ExclusiveBindError::AccountTaken { qq_number, owner } => {
                BindError::Conflict { qq_number, owner }
            }
        }
    }
}

impl BindError {
    /// 面向用户的提示文本
    pub fn user_message(&self) -> String {
        match self {
            BindError::AlreadyBound { qq_number } => {
                format!("⚠️ 你已绑定 QQ {}，如需更换请先解除绑定。", qq_number)
            }
            BindError::NotBound => "⚠️ 你还没有绑定 QQ。".to_string(),
            BindError::UpstreamUnavailable(_) => {
                "❌ 登录服务暂时不可用，请稍后再试。".to_string()
            }
            BindError::Conflict { qq_number, .. } => {
                format!("❌ QQ {} 已被其他账号绑定。", qq_number)
            }
            BindError::InvalidAccount(s) => format!("❌ 无效的 QQ 号: {}", s),
            BindError::Unauthorized => "❌ 你没有权限执行该指令。".to_string(),
        }
    }
}

/// 绑定数据写盘失败
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 图片缓存错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("下载图片失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("下载图片失败: {0}")]
    Status(u16),

    #[error("写入缓存失败: {0}")]
    Io(#[from] std::io::Error),
}
