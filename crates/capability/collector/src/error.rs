/// 远端采集服务错误。
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected status: {0}")]
    Status(u16),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("config error: {0}")]
    Config(String),
}

impl CollectorError {
    /// 可重试的错误：超时、连接失败、服务端 5xx。
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}
