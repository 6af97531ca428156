//! MU 传感节点进程：串口采集、本地落盘与扇出、远端转发。

mod node;

use chrono::Local;
use domain::NodeContext;
use mu_collector::{
    CollectorApi, CollectorConfig, DEFAULT_REMOTE_FIELDS_YAML, collector_for,
    parse_data_field_specs, register_data_fields,
};
use mu_config::AppConfig;
use mu_ingest::RecordClassifier;
use mu_normalize::ColumnLayout;
use mu_notify::{
    MqttPublisher, MqttPublisherConfig, NodePublisher, NoopPublisher, Publisher, ThrottledNotifier,
};
use mu_pipeline::{CollectorForwarder, DeliveryQueue};
use mu_protocol::{Device, DeviceSettings, SerialTransport};
use mu_storage::{MeasurementSink, RotatingCsvStorage, device_dir};
use mu_telemetry::{init_tracing, metrics, new_session_id};
use node::{SensorNode, StorageOpener, normalizer_for};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let context = NodeContext::new(config.hostname.clone(), &config.file_prefix, new_session_id());
    info!(
        target: "mu.node",
        hostname = %context.hostname,
        device = %context.device,
        session_id = %context.session_id,
        serial_port = %config.serial_port,
        "node_starting"
    );

    // 本地扇出：未配置 broker 时使用空发布器
    let mut mqtt_task = None;
    let publisher: Arc<dyn Publisher> = match &config.mqtt_host {
        Some(host) => {
            let (publisher, task) = MqttPublisher::connect(MqttPublisherConfig {
                host: host.clone(),
                port: config.mqtt_port,
            });
            mqtt_task = Some(task);
            Arc::new(publisher)
        }
        None => Arc::new(NoopPublisher),
    };
    let node_publisher =
        NodePublisher::new(publisher.clone(), &config.mqtt_topic_prefix, &config.hostname);
    let notifier = ThrottledNotifier::new(
        publisher,
        &config.mqtt_topic_prefix,
        &config.hostname,
        Duration::from_secs(config.notify_min_interval_seconds),
    );

    // 远端采集服务：注册放在后台，不阻塞采集启动
    let collector = collector_for(collector_config(&config), &config.api_nodes, &config.hostname)?;
    let delivery = if collector.is_enabled() {
        tokio::spawn(register_remote(
            collector.clone(),
            config.hostname.clone(),
            config
                .api_display_name
                .clone()
                .unwrap_or_else(|| config.hostname.clone()),
        ));
        let forwarder = Arc::new(CollectorForwarder::new(collector, config.hostname.clone()));
        Some(DeliveryQueue::start(
            forwarder,
            Duration::from_millis(config.api_push_timeout_ms),
        ))
    } else {
        None
    };

    let layout = match &config.data_fields_path {
        Some(path) => ColumnLayout::from_path(path)?,
        None => ColumnLayout::builtin()?,
    };
    let classifier = RecordClassifier::new(config.hostname.clone());
    let normalizer = normalizer_for(layout, &classifier);
    let open_storage = csv_storage_opener(&config, normalizer.header());

    let transport = SerialTransport::open(&config.serial_port, config.baudrate)?;
    let settings = DeviceSettings {
        interval_ms: config.meas_interval_ms,
        ..DeviceSettings::default()
    };
    let (queue, worker) = match delivery {
        Some((queue, worker)) => (Some(queue), Some(worker)),
        None => (None, None),
    };
    let node = SensorNode::new(
        Device::new(transport),
        classifier,
        normalizer,
        open_storage,
        node_publisher,
        notifier,
        context,
    )
    .with_settings(settings)
    .with_queue(queue);

    let stop = node.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "mu.node", "shutdown_signal_received");
            stop.store(true, Ordering::SeqCst);
        }
    });

    // 采集线程独占串口，不参与任何网络等待
    let result = tokio::task::spawn_blocking(move || node.run()).await;
    if let Some(worker) = worker {
        worker.join().await;
    }
    if let Some(task) = mqtt_task {
        task.abort();
    }

    let snapshot = metrics().snapshot();
    info!(
        target: "mu.node",
        frames_decoded = snapshot.frames_decoded,
        csv_rows_written = snapshot.csv_rows_written,
        forward_success = snapshot.forward_success,
        forward_failure = snapshot.forward_failure,
        forward_latency_ms_avg = snapshot.forward_latency_ms_avg(),
        "node_stopped"
    );
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(target: "mu.node", error = %err, "acquisition_failed");
            Err(err.into())
        }
        Err(err) => {
            error!(target: "mu.node", error = %err, "acquisition_task_failed");
            Err(err.into())
        }
    }
}

/// CSV 目录按设备 ID 区分，启动查询到状态后再打开。
fn csv_storage_opener(config: &AppConfig, header: Vec<String>) -> StorageOpener {
    let base = PathBuf::from(&config.csv_dir);
    let prefix = config.file_prefix.clone();
    let rotation_hours = config.csv_rotation_hours;
    Box::new(move |device_id| {
        let storage = RotatingCsvStorage::open(
            device_dir(&base, device_id),
            prefix.clone(),
            header.clone(),
            rotation_hours,
            Local::now(),
        )?;
        info!(
            target: "mu.node",
            path = %storage.current_path().display(),
            "csv_storage_opened"
        );
        Ok(Box::new(storage) as Box<dyn MeasurementSink>)
    })
}

fn collector_config(config: &AppConfig) -> Option<CollectorConfig> {
    let url = config.api_url.as_ref()?;
    let mut collector = CollectorConfig::new(url.clone());
    collector.auth = config.api_auth.clone();
    collector.push_timeout = Duration::from_millis(config.api_push_timeout_ms);
    collector.read_timeout = Duration::from_millis(config.api_read_timeout_ms);
    collector.max_retries = config.api_max_retries;
    collector.backoff = Duration::from_millis(config.api_backoff_ms);
    Some(collector)
}

async fn register_remote(collector: Arc<dyn CollectorApi>, handle: String, name: String) {
    match collector.register_node(&handle, &name).await {
        Ok(true) => info!(target: "mu.node", handle = %handle, "remote_node_created"),
        Ok(false) => info!(target: "mu.node", handle = %handle, "remote_node_present"),
        Err(err) => warn!(target: "mu.node", handle = %handle, error = %err, "remote_node_register_failed"),
    }
    let specs = match parse_data_field_specs(DEFAULT_REMOTE_FIELDS_YAML) {
        Ok(specs) => specs,
        Err(err) => {
            warn!(target: "mu.node", error = %err, "remote_fields_invalid");
            return;
        }
    };
    if let Err(err) = register_data_fields(collector.as_ref(), &specs).await {
        warn!(target: "mu.node", error = %err, "remote_fields_register_failed");
    }
}
