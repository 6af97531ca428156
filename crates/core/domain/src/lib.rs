pub mod data;

pub use data::{DeliveryTask, HeaderRecord, Measurement, MessageKind, Record};

/// 节点上下文：一次采集会话内所有模块共享的身份信息。
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// 节点主机名（如 rockpi、OB-ZAG-0），同时作为远端 node handle。
    pub hostname: String,
    /// 设备短名（如 ACM0、CYB1），取自文件前缀的最后一段。
    pub device: String,
    /// 采集会话 ID。
    pub session_id: String,
}

impl NodeContext {
    /// 构造节点上下文；device 从文件前缀 `xxx_yyy_CYB1` 的最后一段推导。
    pub fn new(
        hostname: impl Into<String>,
        file_prefix: &str,
        session_id: impl Into<String>,
    ) -> Self {
        let device = file_prefix
            .rsplit('_')
            .next()
            .unwrap_or(file_prefix)
            .to_string();
        Self {
            hostname: hostname.into(),
            device,
            session_id: session_id.into(),
        }
    }
}
