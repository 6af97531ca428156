use crate::PipelineError;
use async_trait::async_trait;
use domain::DeliveryTask;
use mu_collector::CollectorApi;
use std::sync::Arc;

/// 单条任务的转发动作。
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, task: DeliveryTask) -> Result<(), PipelineError>;
}

/// 推送到远端采集服务，node handle 固定为本节点。
pub struct CollectorForwarder {
    collector: Arc<dyn CollectorApi>,
    node_handle: String,
}

impl CollectorForwarder {
    pub fn new(collector: Arc<dyn CollectorApi>, node_handle: impl Into<String>) -> Self {
        Self {
            collector,
            node_handle: node_handle.into(),
        }
    }
}

#[async_trait]
impl Forwarder for CollectorForwarder {
    async fn forward(&self, task: DeliveryTask) -> Result<(), PipelineError> {
        self.collector
            .push(task.timestamp.into(), &task.fields, &self.node_handle)
            .await
            .map_err(|err| PipelineError::Forward(err.to_string()))
    }
}
