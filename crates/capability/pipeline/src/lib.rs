//! 远端转发流水线。
//!
//! 采集线程通过 [`DeliveryQueue::enqueue`] 非阻塞地投递任务，
//! 单个 [`ForwardingWorker`] 按 FIFO 顺序调用 [`Forwarder`]，每次调用都有硬超时，
//! 结果记入容量为 10 的 [`SuccessWindow`]。

mod forwarder;
mod queue;
mod window;

pub use forwarder::{CollectorForwarder, Forwarder};
pub use queue::{DeliveryQueue, ForwardingWorker, QUEUE_CAPACITY, QueueReceiver};
pub use window::{SuccessWindow, WINDOW_CAPACITY};

/// 失败率超过该值时按 warning 上报。
pub const WARN_FAILURE_RATIO: f64 = 0.49;
/// 失败率超过该值时按 error 上报。
pub const ERROR_FAILURE_RATIO: f64 = 0.89;

/// 失败率对应的告警等级。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn from_failure_ratio(ratio: f64) -> Self {
        if ratio > ERROR_FAILURE_RATIO {
            Severity::Error
        } else if ratio > WARN_FAILURE_RATIO {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("queue full: failure ratio {ratio:.2}")]
    QueueFull { ratio: f64 },
    #[error("queue closed")]
    Closed,
    #[error("forward error: {0}")]
    Forward(String),
}
