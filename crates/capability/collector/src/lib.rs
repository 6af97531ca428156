//! 远端采集服务客户端。
//!
//! - `CollectorApi`：节点注册、数据推送、列表查询等 async 接口
//! - `HttpCollector`：基于 reqwest 的实现（读请求自动重试，带缓存）
//! - `NoopCollector`：未配置远端或本节点不在白名单时使用
//!
//! 所有网络失败以 `CollectorError` 返回，不会导致进程退出。

mod error;
mod fields;
mod http;
mod timestamp;

pub use error::CollectorError;
pub use fields::{DEFAULT_REMOTE_FIELDS_YAML, parse_data_field_specs, register_data_fields};
pub use http::{CollectorConfig, HttpCollector};
pub use timestamp::{PushTimestamp, validate_timestamp};

use api_contract::{DataField, DateRange, NodeInfo, SensorDataMultipleResponse};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// 远端采集服务接口。
#[async_trait]
pub trait CollectorApi: Send + Sync {
    /// 是否真正连接远端；`NoopCollector` 返回 false。
    fn is_enabled(&self) -> bool {
        true
    }

    /// 注册节点（幂等）。返回是否实际发出了创建请求且成功。
    async fn register_node(&self, handle: &str, name: &str) -> Result<bool, CollectorError>;

    /// 推送一条测量数据；时间戳在发出请求前校验。
    async fn push(
        &self,
        timestamp: PushTimestamp,
        fields: &BTreeMap<String, f64>,
        node_handle: &str,
    ) -> Result<(), CollectorError>;

    async fn list_nodes(&self, force_refresh: bool) -> Result<Vec<NodeInfo>, CollectorError>;

    async fn list_data_fields(&self, force_refresh: bool)
    -> Result<Vec<DataField>, CollectorError>;

    async fn node_exists(&self, handle: &str, force_refresh: bool) -> Result<bool, CollectorError> {
        let nodes = self.list_nodes(force_refresh).await?;
        Ok(nodes.iter().any(|node| node.handle == handle))
    }

    async fn delete_node(&self, handle: &str) -> Result<(), CollectorError>;

    async fn add_data_field(&self, field: &DataField) -> Result<(), CollectorError>;

    async fn delete_data_field(&self, handle: &str) -> Result<(), CollectorError>;

    async fn fetch_sensor_data(
        &self,
        date_range: DateRange,
        node_handles: &[String],
    ) -> Result<SensorDataMultipleResponse, CollectorError>;
}

/// 空实现：所有写操作直接成功，查询返回空。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCollector;

#[async_trait]
impl CollectorApi for NoopCollector {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn register_node(&self, _handle: &str, _name: &str) -> Result<bool, CollectorError> {
        Ok(false)
    }

    async fn push(
        &self,
        timestamp: PushTimestamp,
        _fields: &BTreeMap<String, f64>,
        _node_handle: &str,
    ) -> Result<(), CollectorError> {
        validate_timestamp(&timestamp).map(|_| ())
    }

    async fn list_nodes(&self, _force_refresh: bool) -> Result<Vec<NodeInfo>, CollectorError> {
        Ok(Vec::new())
    }

    async fn list_data_fields(
        &self,
        _force_refresh: bool,
    ) -> Result<Vec<DataField>, CollectorError> {
        Ok(Vec::new())
    }

    async fn delete_node(&self, _handle: &str) -> Result<(), CollectorError> {
        Ok(())
    }

    async fn add_data_field(&self, _field: &DataField) -> Result<(), CollectorError> {
        Ok(())
    }

    async fn delete_data_field(&self, _handle: &str) -> Result<(), CollectorError> {
        Ok(())
    }

    async fn fetch_sensor_data(
        &self,
        _date_range: DateRange,
        _node_handles: &[String],
    ) -> Result<SensorDataMultipleResponse, CollectorError> {
        Ok(SensorDataMultipleResponse {
            data: HashMap::new(),
        })
    }
}

/// 按配置构造客户端：未配置地址或节点不在白名单时返回 `NoopCollector`。
pub fn collector_for(
    config: Option<CollectorConfig>,
    allowed_nodes: &[String],
    hostname: &str,
) -> Result<Arc<dyn CollectorApi>, CollectorError> {
    let Some(config) = config else {
        info!(target: "mu.collector", "collector_disabled_no_url");
        return Ok(Arc::new(NoopCollector));
    };
    if !allowed_nodes.iter().any(|node| node == hostname) {
        info!(target: "mu.collector", hostname, "collector_disabled_node_not_allowed");
        return Ok(Arc::new(NoopCollector));
    }
    Ok(Arc::new(HttpCollector::new(config)?))
}
