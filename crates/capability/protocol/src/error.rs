//! 协议错误类型定义

/// 设备通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 串口打开/配置错误
    #[error("serial error: {0}")]
    Serial(String),

    /// 命令参数非法（不下发）
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 状态报文解析错误
    #[error("status parse error: {0}")]
    StatusParse(String),

    /// 传输已关闭（模拟传输数据耗尽）
    #[error("transport closed")]
    TransportClosed,
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        Self::Serial(err.to_string())
    }
}
