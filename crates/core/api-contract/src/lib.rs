//! 远端采集服务的请求/响应契约。
//!
//! 字段名与远端服务保持一致（snake_case），客户端与测试中的模拟服务共用。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// 推送与查询使用的时间戳格式（UTC）。
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 列表类响应封装：`{"data": [...]}`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiList<T> {
    pub data: Vec<T>,
}

impl<T> ApiList<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// 节点信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// 节点内部标识。必须包含字母，纯数字 handle 会导致远端出错。
    pub handle: String,
    /// 页面展示名。
    pub name: String,
}

/// 按 handle 删除节点或数据字段的请求体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleRequest {
    pub handle: String,
}

/// 数据字段定义。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataField {
    pub handle: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
}

/// YAML 中的数据字段配置：`field: {show, name, unit}`。
#[derive(Debug, Clone, Deserialize)]
pub struct DataFieldSpec {
    #[serde(default)]
    pub show: bool,
    pub name: String,
    #[serde(default)]
    pub unit: String,
}

/// 单条测量推送请求体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDataRequest {
    pub node_handle: String,
    pub data: BTreeMap<String, f64>,
    /// UTC 时间，格式见 [`TIMESTAMP_FORMAT`]。
    pub date: String,
}

/// 批量查询时间范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateRange {
    #[serde(rename = "last_hour")]
    LastHour,
    #[serde(rename = "last_day")]
    LastDay,
    #[serde(rename = "month")]
    LastMonth,
    #[serde(rename = "twelve_months")]
    LastYear,
}

/// 批量查询请求体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDataMultipleRequest {
    pub node_handles: Vec<String>,
    pub date_range: DateRange,
}

/// 批量查询返回的单条记录，除 `data` 外的元数据字段原样保留。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDataEntry {
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

/// 批量查询响应：`{"data": {node_handle: [entry, ...]}}`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDataMultipleResponse {
    pub data: HashMap<String, Vec<SensorDataEntry>>,
}
