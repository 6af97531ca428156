use api_contract::{DataField, DateRange, NodeInfo, SensorDataMultipleResponse};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use domain::DeliveryTask;
use mu_collector::{CollectorApi, CollectorError, PushTimestamp, validate_timestamp};
use mu_pipeline::{CollectorForwarder, DeliveryQueue};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 记录每次推送的 (node handle, 格式化时间)，开关打开时推送挂起。
#[derive(Default)]
struct HangingCollector {
    hang: AtomicBool,
    pushes: Mutex<Vec<(String, String)>>,
}

impl HangingCollector {
    fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().expect("pushes lock").clone()
    }
}

#[async_trait]
impl CollectorApi for HangingCollector {
    async fn register_node(&self, _handle: &str, _name: &str) -> Result<bool, CollectorError> {
        Ok(false)
    }

    async fn push(
        &self,
        timestamp: PushTimestamp,
        _fields: &BTreeMap<String, f64>,
        node_handle: &str,
    ) -> Result<(), CollectorError> {
        let formatted = validate_timestamp(&timestamp)?;
        self.pushes
            .lock()
            .expect("pushes lock")
            .push((node_handle.to_string(), formatted));
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(())
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

fn task() -> DeliveryTask {
    let at = Utc
        .with_ymd_and_hms(2024, 3, 5, 12, 0, 0)
        .single()
        .expect("time");
    DeliveryTask::new(at, BTreeMap::from([("temp_external".to_string(), 21.5)]))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

#[tokio::test]
async fn collector_timeouts_fill_window_and_worker_keeps_serving() {
    let collector = Arc::new(HangingCollector::default());
    collector.hang.store(true, Ordering::SeqCst);
    let forwarder = Arc::new(CollectorForwarder::new(collector.clone(), "rpi0"));
    let (queue, worker) = DeliveryQueue::start(forwarder, Duration::from_millis(20));

    for _ in 0..10 {
        queue.enqueue(task()).expect("enqueue");
    }
    wait_until(|| queue.recorded_outcomes() == 10).await;
    assert_eq!(queue.failure_ratio(), 1.0);
    assert!(!worker.is_finished());

    collector.hang.store(false, Ordering::SeqCst);
    queue.enqueue(task()).expect("enqueue after timeouts");
    wait_until(|| queue.failure_ratio() < 1.0).await;
    assert!((queue.failure_ratio() - 0.9).abs() < 1e-9);

    let pushes = collector.pushes();
    assert_eq!(pushes.len(), 11);
    assert!(
        pushes
            .iter()
            .all(|(handle, at)| handle == "rpi0" && at == "2024-03-05 12:00:00")
    );

    queue.stop();
    worker.join().await;
}
