// 核心错误类型
//
// 错误分类：
// - 可重试的后端错误：响应格式异常、非零 code、HTTP 429、网络错误
// - 终止性错误：ListFailed / TransferFailed / CompletionTimeout
// - 参数错误：在发出任何网络请求之前失败
// - 用户中断：独立的控制路径，批量操作中不会被当作单项失败吞掉

use thiserror::Error;

/// 核心库统一的 Result 类型
pub type PanResult<T> = std::result::Result<T, PanError>;

/// 123 云盘客户端错误
#[derive(Debug, Error)]
pub enum PanError {
    /// 接口返回非零 code
    #[error("API 错误 {code}: {message}")]
    Api { code: i64, message: String },

    /// 被限流（HTTP 429 或 code 429）
    #[error("请求被限流 (429)")]
    RateLimited,

    /// 非 2xx 的 HTTP 状态码
    #[error("HTTP 错误 {status}: {body}")]
    Http { status: u16, body: String },

    /// 网络层错误（连接失败、超时等）
    #[error("网络请求失败: {0}")]
    Network(String),

    /// 响应不是预期的结构
    #[error("响应格式异常: {0}")]
    Malformed(String),

    /// 远程路径不存在
    #[error("路径不存在: {0}")]
    NotFound(String),

    /// 分页列表重试耗尽
    #[error("获取目录 {parent_id} 列表失败 (已尝试 {attempts} 次): {last_error}")]
    ListFailed {
        parent_id: i64,
        attempts: u32,
        last_error: String,
    },

    /// 上传/下载失败
    #[error("传输失败: {0}")]
    TransferFailed(String),

    /// 上传完成确认轮询超时
    #[error("上传完成确认超时: preuploadID={preupload_id}, 已等待 {waited_secs}s")]
    CompletionTimeout {
        preupload_id: String,
        waited_secs: u64,
    },

    /// 下载内容的 MD5 与 etag 不一致
    #[error("MD5 校验失败: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// 调用方输入不合法
    #[error("参数错误: {0}")]
    Validation(String),

    /// 授权失败（缺少凭证、刷新 token 失败）
    #[error("授权失败: {0}")]
    Auth(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 用户中断（Ctrl-C）
    #[error("操作已被用户中断")]
    Interrupted,
}

impl From<reqwest::Error> for PanError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return PanError::RateLimited;
            }
            return PanError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        PanError::Network(err.to_string())
    }
}

impl PanError {
    /// 是否为可重试的后端错误
    pub fn is_transient(&self) -> bool {
        match self {
            PanError::Api { .. }
            | PanError::RateLimited
            | PanError::Network(_)
            | PanError::Malformed(_) => true,
            PanError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// 是否为限流错误（需要更长的退避）
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            PanError::RateLimited
                | PanError::Api { code: 429, .. }
                | PanError::Http { status: 429, .. }
        )
    }

    /// 是否为用户中断
    pub fn is_interrupt(&self) -> bool {
        matches!(self, PanError::Interrupted)
    }

    /// 接口返回的 code（非 API 错误返回 None）
    pub fn api_code(&self) -> Option<i64> {
        match self {
            PanError::Api { code, .. } => Some(*code),
            PanError::RateLimited => Some(429),
            _ => None,
        }
    }
}
