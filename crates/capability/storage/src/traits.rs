//! 存储接口定义
//!
//! 采集线程为阻塞上下文，接口为同步调用。

use crate::error::StorageError;
use chrono::{DateTime, Local};

/// 测量行写入接口
pub trait MeasurementSink: Send {
    /// 写入一行；`at` 为测量时刻（本地时间）。
    fn write_row(&mut self, at: DateTime<Local>, row: &[f64]) -> Result<(), StorageError>;
}

/// 丢弃所有写入（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopSink;

impl MeasurementSink for NoopSink {
    fn write_row(&mut self, _at: DateTime<Local>, _row: &[f64]) -> Result<(), StorageError> {
        Ok(())
    }
}
