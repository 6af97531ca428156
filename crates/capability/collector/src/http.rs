use crate::{CollectorApi, CollectorError, PushTimestamp, validate_timestamp};
use api_contract::{
    ApiList, DataField, DateRange, HandleRequest, NodeInfo, SensorDataMultipleRequest,
    SensorDataMultipleResponse, SensorDataRequest,
};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// HTTP 客户端配置。
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// API 根地址，不带结尾 `/`。
    pub base_url: String,
    pub auth: Option<String>,
    /// 数据推送超时（短）。
    pub push_timeout: Duration,
    /// 查询、注册超时。
    pub read_timeout: Duration,
    /// 读请求失败后的最大重试次数。
    pub max_retries: u32,
    /// 首次重试等待，之后每次翻倍。
    pub backoff: Duration,
}

impl CollectorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
            push_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// 基于 reqwest 的远端客户端，节点与字段列表在首次成功查询后缓存。
pub struct HttpCollector {
    client: Client,
    config: CollectorConfig,
    nodes: RwLock<Option<Vec<NodeInfo>>>,
    data_fields: RwLock<Option<Vec<DataField>>>,
}

impl HttpCollector {
    pub fn new(config: CollectorConfig) -> Result<Self, CollectorError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(auth) = &config.auth {
            let value = HeaderValue::from_str(auth)
                .map_err(|err| CollectorError::Config(format!("authorization header: {err}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.read_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            nodes: RwLock::new(None),
            data_fields: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    async fn send(request: RequestBuilder) -> Result<Response, CollectorError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Status(status.as_u16()));
        }
        Ok(response)
    }

    /// 幂等读请求：瞬时错误按指数退避重试。
    async fn read_json<T, F>(&self, path: &str, build: F) -> Result<T, CollectorError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let result = match Self::send(build()).await {
                Ok(response) => response.json::<T>().await.map_err(CollectorError::from),
                Err(err) => Err(err),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!(
                        target: "mu.collector",
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request_retry"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<(), CollectorError> {
        let request = self.client.post(self.url(path)).json(body).timeout(timeout);
        Self::send(request).await.map(|_| ())
    }
}

#[async_trait]
impl CollectorApi for HttpCollector {
    async fn register_node(&self, handle: &str, name: &str) -> Result<bool, CollectorError> {
        if self.node_exists(handle, false).await? {
            debug!(target: "mu.collector", handle, "node_already_registered");
            return Ok(false);
        }
        let node = NodeInfo {
            handle: handle.to_string(),
            name: name.to_string(),
        };
        match self.post("nodes", &node, self.config.read_timeout).await {
            Ok(()) => {
                if let Some(nodes) = self.nodes.write().await.as_mut() {
                    nodes.push(node);
                }
                info!(target: "mu.collector", handle, name, "node_registered");
                Ok(true)
            }
            Err(CollectorError::Status(status)) => {
                warn!(target: "mu.collector", handle, status, "node_register_rejected");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn push(
        &self,
        timestamp: PushTimestamp,
        fields: &BTreeMap<String, f64>,
        node_handle: &str,
    ) -> Result<(), CollectorError> {
        let date = validate_timestamp(&timestamp)?;
        let body = SensorDataRequest {
            node_handle: node_handle.to_string(),
            data: fields.clone(),
            date,
        };
        self.post("sensordata", &body, self.config.push_timeout).await
    }

    async fn list_nodes(&self, force_refresh: bool) -> Result<Vec<NodeInfo>, CollectorError> {
        if !force_refresh {
            if let Some(nodes) = self.nodes.read().await.as_ref() {
                return Ok(nodes.clone());
            }
        }
        let url = self.url("nodes");
        let list: ApiList<NodeInfo> = self.read_json("nodes", || self.client.get(&url)).await?;
        *self.nodes.write().await = Some(list.data.clone());
        Ok(list.data)
    }

    async fn list_data_fields(
        &self,
        force_refresh: bool,
    ) -> Result<Vec<DataField>, CollectorError> {
        if !force_refresh {
            if let Some(fields) = self.data_fields.read().await.as_ref() {
                return Ok(fields.clone());
            }
        }
        let url = self.url("data-field");
        let list: ApiList<DataField> =
            self.read_json("data-field", || self.client.get(&url)).await?;
        *self.data_fields.write().await = Some(list.data.clone());
        Ok(list.data)
    }

    async fn delete_node(&self, handle: &str) -> Result<(), CollectorError> {
        let body = HandleRequest {
            handle: handle.to_string(),
        };
        self.post("nodes/delete", &body, self.config.read_timeout).await?;
        if let Some(nodes) = self.nodes.write().await.as_mut() {
            nodes.retain(|node| node.handle != handle);
        }
        info!(target: "mu.collector", handle, "node_deleted");
        Ok(())
    }

    async fn add_data_field(&self, field: &DataField) -> Result<(), CollectorError> {
        self.post("data-field", field, self.config.read_timeout).await?;
        if let Some(fields) = self.data_fields.write().await.as_mut() {
            fields.push(field.clone());
        }
        info!(target: "mu.collector", handle = %field.handle, "data_field_added");
        Ok(())
    }

    async fn delete_data_field(&self, handle: &str) -> Result<(), CollectorError> {
        let body = HandleRequest {
            handle: handle.to_string(),
        };
        self.post("data-field/delete", &body, self.config.read_timeout)
            .await?;
        if let Some(fields) = self.data_fields.write().await.as_mut() {
            fields.retain(|field| field.handle != handle);
        }
        Ok(())
    }

    async fn fetch_sensor_data(
        &self,
        date_range: DateRange,
        node_handles: &[String],
    ) -> Result<SensorDataMultipleResponse, CollectorError> {
        let body = SensorDataMultipleRequest {
            node_handles: node_handles.to_vec(),
            date_range,
        };
        let url = self.url("sensordata-multiple");
        self.read_json("sensordata-multiple", || self.client.post(&url).json(&body))
            .await
    }
}
