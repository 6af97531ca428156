use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// 设备消息类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Header,
    Data,
    DataWithMeta,
}

/// 解码后的测量记录。
///
/// `device_id` / `measurement_mode` 来自最近一次 Header（或带元数据的数据行），
/// 在此之前默认为 0。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub hostname: String,
    pub kind: MessageKind,
    pub device_id: i64,
    pub measurement_mode: i64,
    /// Unix 时间戳（秒），设备无时钟，取接收时刻。
    pub timestamp: i64,
    pub values: Vec<i64>,
    pub extra_sensor_values: Vec<f64>,
}

/// Header 记录：仅用于诊断展示，不落盘。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderRecord {
    pub hostname: String,
    pub device_id: i64,
    pub measurement_mode: i64,
    pub raw: String,
}

/// 分类结果。
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Header(HeaderRecord),
    Measurement(Measurement),
}

impl Record {
    pub fn kind(&self) -> MessageKind {
        match self {
            Record::Header(_) => MessageKind::Header,
            Record::Measurement(measurement) => measurement.kind,
        }
    }
}

/// 远端转发任务。
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTask {
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
}

impl DeliveryTask {
    pub fn new(timestamp: DateTime<Utc>, fields: BTreeMap<String, f64>) -> Self {
        Self { timestamp, fields }
    }
}
