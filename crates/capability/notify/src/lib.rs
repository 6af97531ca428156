//! 本地发布：MQTT 扇出与限流告警。
//!
//! 发布在采集线程内调用，使用 `try_publish` 不阻塞；失败只记录日志。

use domain::{HeaderRecord, Measurement};
use rumqttc::{MqttOptions, QoS};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 发布错误。
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("publish error: {0}")]
    Publish(String),
    #[error("payload error: {0}")]
    Payload(String),
}

/// 发布器抽象。
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError>;
}

/// 空发布器（未配置 broker 时使用）。
#[derive(Debug, Default)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// MQTT 发布器配置。
#[derive(Debug, Clone)]
pub struct MqttPublisherConfig {
    pub host: String,
    pub port: u16,
}

/// MQTT 发布器实现。
#[derive(Clone)]
pub struct MqttPublisher {
    client: rumqttc::AsyncClient,
}

impl MqttPublisher {
    /// 建立连接并在后台轮询事件循环；须在 tokio 运行时内调用。
    pub fn connect(config: MqttPublisherConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let client_id = format!("mu-node-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = rumqttc::AsyncClient::new(options, 64);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "mu.notify", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        (Self { client }, handle)
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|err| NotifyError::Publish(err.to_string()))
    }
}

/// 节点数据扇出：`{prefix}/{hostname}/header` 与 `{prefix}/{hostname}/data`。
#[derive(Clone)]
pub struct NodePublisher {
    publisher: Arc<dyn Publisher>,
    base_topic: String,
}

impl NodePublisher {
    pub fn new(publisher: Arc<dyn Publisher>, prefix: &str, hostname: &str) -> Self {
        Self {
            publisher,
            base_topic: format!("{}/{}", prefix.trim_end_matches('/'), hostname),
        }
    }

    pub fn header_topic(&self) -> String {
        format!("{}/header", self.base_topic)
    }

    pub fn data_topic(&self) -> String {
        format!("{}/data", self.base_topic)
    }

    pub fn publish_header(&self, header: &HeaderRecord) -> Result<(), NotifyError> {
        let payload =
            serde_json::to_vec(header).map_err(|err| NotifyError::Payload(err.to_string()))?;
        self.publisher.publish(&self.header_topic(), payload)
    }

    pub fn publish_measurement(&self, measurement: &Measurement) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(measurement)
            .map_err(|err| NotifyError::Payload(err.to_string()))?;
        self.publisher.publish(&self.data_topic(), payload)
    }
}

/// 限流告警：同一 topic 在最小间隔内只发送一次。
pub struct ThrottledNotifier {
    publisher: Arc<dyn Publisher>,
    base_topic: String,
    min_interval: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl ThrottledNotifier {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        prefix: &str,
        hostname: &str,
        min_interval: Duration,
    ) -> Self {
        Self {
            publisher,
            base_topic: format!("{}/{}/notify", prefix.trim_end_matches('/'), hostname),
            min_interval,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn notify(&self, topic: &str, message: &str) -> bool {
        self.notify_at(topic, message, Instant::now())
    }

    /// 返回本次是否实际发送（被限流时为 false）。
    pub fn notify_at(&self, topic: &str, message: &str, now: Instant) -> bool {
        {
            let mut last_sent = self
                .last_sent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(last) = last_sent.get(topic) {
                if now.saturating_duration_since(*last) <= self.min_interval {
                    debug!(target: "mu.notify", topic, "notification_throttled");
                    return false;
                }
            }
            last_sent.insert(topic.to_string(), now);
        }

        let full_topic = format!("{}/{}", self.base_topic, topic);
        match self
            .publisher
            .publish(&full_topic, message.as_bytes().to_vec())
        {
            Ok(()) => debug!(target: "mu.notify", topic = %full_topic, message, "notification_published"),
            Err(err) => warn!(target: "mu.notify", topic = %full_topic, error = %err, "notification_failed"),
        }
        true
    }
}
