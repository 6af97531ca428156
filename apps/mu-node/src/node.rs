//! 采集循环装配
//!
//! 串口行 → 分类 → {本地扇出, CSV, 转发队列}。整个循环运行在阻塞线程内，
//! 每次只读取一个字节单元，保证停止标志至少每个串口超时周期被检查一次。

use chrono::{DateTime, Local, Utc};
use domain::{DeliveryTask, Measurement, NodeContext, Record};
use mu_ingest::RecordClassifier;
use mu_normalize::{ColumnLayout, Normalizer};
use mu_notify::{NodePublisher, ThrottledNotifier};
use mu_pipeline::{DeliveryQueue, PipelineError, Severity};
use mu_protocol::{
    Device, DeviceInfo, DeviceSettings, DeviceStatus, ProtocolError, TiaAmplification, Transport,
};
use mu_storage::{MeasurementSink, NoopSink, StorageError};
use mu_telemetry::{record_csv_row_written, record_csv_write_failure, record_record_dropped};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 每处理多少行输出一次耗时统计。
const TIMING_REPORT_EVERY: u64 = 100;
/// 每多少个数据点输出一次运行状态。
const STATUS_REPORT_EVERY: u64 = 180;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// 按设备 ID 打开存储；ID 在启动查询状态后才可知。
pub type StorageOpener =
    Box<dyn FnMut(Option<i64>) -> Result<Box<dyn MeasurementSink>, StorageError> + Send>;

/// 列布局加上分类器附加传感器的列，保证 CSV 行与表头对齐。
pub fn normalizer_for(layout: ColumnLayout, classifier: &RecordClassifier) -> Normalizer {
    Normalizer::new(layout.with_extra_columns(classifier.extra_sensor_names()))
}

#[derive(Debug)]
struct LoopStats {
    started_at: Instant,
    lines: u64,
    datapoints: u64,
    loop_time: Duration,
    processing_time: Duration,
    last_line_at: Instant,
}

impl LoopStats {
    fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            lines: 0,
            datapoints: 0,
            loop_time: Duration::ZERO,
            processing_time: Duration::ZERO,
            last_line_at: now,
        }
    }

    fn record_line(&mut self, received_at: Instant, processing: Duration) {
        self.lines += 1;
        self.loop_time += received_at.saturating_duration_since(self.last_line_at) + processing;
        self.processing_time += processing;
        self.last_line_at = received_at + processing;
        if self.lines % TIMING_REPORT_EVERY == 0 {
            let count = TIMING_REPORT_EVERY as u32;
            info!(
                target: "mu.node",
                avg_loop_ms = (self.loop_time / count).as_millis() as u64,
                avg_processing_ms = (self.processing_time / count).as_millis() as u64,
                "loop_timing"
            );
            self.loop_time = Duration::ZERO;
            self.processing_time = Duration::ZERO;
        }
    }

    fn record_datapoint(&mut self, hostname: &str) {
        self.datapoints += 1;
        if self.datapoints % STATUS_REPORT_EVERY == 0 {
            info!(
                target: "mu.node",
                hostname,
                running_seconds = self.started_at.elapsed().as_secs(),
                datapoints = self.datapoints,
                "node_status"
            );
        }
    }
}

/// 传感节点：持有设备、分类器与所有下游。
pub struct SensorNode<T: Transport> {
    device: Device<T>,
    classifier: RecordClassifier,
    normalizer: Normalizer,
    storage: Box<dyn MeasurementSink>,
    open_storage: StorageOpener,
    publisher: NodePublisher,
    notifier: ThrottledNotifier,
    queue: Option<DeliveryQueue>,
    settings: DeviceSettings,
    context: NodeContext,
    stop: Arc<AtomicBool>,
    stats: LoopStats,
}

impl<T: Transport> SensorNode<T> {
    pub fn new(
        device: Device<T>,
        classifier: RecordClassifier,
        normalizer: Normalizer,
        open_storage: StorageOpener,
        publisher: NodePublisher,
        notifier: ThrottledNotifier,
        context: NodeContext,
    ) -> Self {
        Self {
            device,
            classifier,
            normalizer,
            storage: Box::new(NoopSink),
            open_storage,
            publisher,
            notifier,
            queue: None,
            settings: DeviceSettings::default(),
            context,
            stop: Arc::new(AtomicBool::new(false)),
            stats: LoopStats::new(Instant::now()),
        }
    }

    pub fn with_settings(mut self, settings: DeviceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_queue(mut self, queue: Option<DeliveryQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// 启动、采集直到停止或串口失败，然后停止测量并重启设备。
    pub fn run(mut self) -> Result<(), NodeError> {
        let result = self.start().and_then(|()| self.acquire());
        self.shutdown();
        result
    }

    /// 查询状态，按需下发设置，打开该设备的存储并开始测量。
    pub(crate) fn start(&mut self) -> Result<(), NodeError> {
        let status = match self.device.query_info() {
            Ok(info) => {
                log_device_info(&info);
                Some(info.status)
            }
            Err(err) => {
                warn!(target: "mu.node", error = %err, "device_status_unavailable");
                None
            }
        };
        self.device.apply_settings(&self.settings, status.as_ref())?;
        self.storage = (self.open_storage)(status.as_ref().and_then(DeviceStatus::id))?;
        self.device.start_measurement()?;
        self.stats = LoopStats::new(Instant::now());
        info!(
            target: "mu.node",
            hostname = %self.context.hostname,
            device = %self.context.device,
            session_id = %self.context.session_id,
            "measurement_started"
        );
        Ok(())
    }

    pub(crate) fn acquire(&mut self) -> Result<(), NodeError> {
        while !self.stop.load(Ordering::SeqCst) {
            let line = self.device.decoder_mut().poll()?;
            self.report_watchdogs();
            let Some(line) = line else {
                continue;
            };
            let received_at = Instant::now();
            self.handle_line(line.as_str(), Local::now());
            self.stats.record_line(received_at, received_at.elapsed());
        }
        info!(target: "mu.node", "acquisition_stopped");
        Ok(())
    }

    pub(crate) fn handle_line(&mut self, line: &str, now: DateTime<Local>) {
        match self.classifier.classify_at(line, now.timestamp()) {
            Some(Record::Header(header)) => {
                if let Err(err) = self.publisher.publish_header(&header) {
                    debug!(target: "mu.node", error = %err, "header_publish_failed");
                }
            }
            Some(Record::Measurement(measurement)) => self.handle_measurement(&measurement, now),
            None => {}
        }
    }

    fn handle_measurement(&mut self, measurement: &Measurement, now: DateTime<Local>) {
        if let Err(err) = self.publisher.publish_measurement(measurement) {
            debug!(target: "mu.node", error = %err, "measurement_publish_failed");
        }

        let record = match self.normalizer.normalize(measurement) {
            Ok(record) => record,
            Err(err) => {
                record_record_dropped();
                warn!(target: "mu.node", error = %err, "normalize_failed");
                return;
            }
        };
        if !record.out_of_range.is_empty() {
            self.notifier.notify(
                "value_out_of_range",
                &format!("values out of range: {}", record.out_of_range.join(", ")),
            );
        }

        match self.storage.write_row(now, &record.row) {
            Ok(()) => record_csv_row_written(),
            Err(err) => {
                record_csv_write_failure();
                error!(target: "mu.node", error = %err, "csv_write_failed");
                self.notifier
                    .notify("csv_error", &format!("writing to csv failed: {err}"));
            }
        }

        if let Some(queue) = &self.queue {
            let task = DeliveryTask::new(now.with_timezone(&Utc), record.fields);
            match queue.enqueue(task) {
                Ok(ratio) => self.report_failure_ratio(ratio),
                Err(PipelineError::QueueFull { ratio }) => {
                    warn!(target: "mu.node", failure_ratio = ratio, "delivery_queue_full");
                    self.notifier.notify(
                        "website_error",
                        &format!("delivery queue full, failure ratio {ratio:.2}"),
                    );
                }
                Err(err) => debug!(target: "mu.node", error = %err, "delivery_enqueue_failed"),
            }
        }

        self.stats.record_datapoint(&self.context.hostname);
    }

    fn report_failure_ratio(&self, ratio: f64) {
        match Severity::from_failure_ratio(ratio) {
            Severity::Info => {}
            Severity::Warning => {
                warn!(target: "mu.node", failure_ratio = ratio, "remote_push_degraded");
                self.notifier.notify(
                    "website_warning",
                    &format!("{:.0}% of recent pushes failed", ratio * 100.0),
                );
            }
            Severity::Error => {
                error!(target: "mu.node", failure_ratio = ratio, "remote_push_failing");
                self.notifier.notify(
                    "website_error",
                    &format!("{:.0}% of recent pushes failed", ratio * 100.0),
                );
            }
        }
    }

    fn report_watchdogs(&mut self) {
        for report in self.device.take_reports() {
            self.notifier.notify("timeout_error", &report.message());
        }
    }

    /// 停止测量、停止转发并重启设备；失败只记录日志。
    pub(crate) fn shutdown(&mut self) {
        if let Err(err) = self.device.stop_measurement() {
            warn!(target: "mu.node", error = %err, "stop_measurement_failed");
        }
        if let Some(queue) = &self.queue {
            queue.stop();
        }
        if let Err(err) = self.device.restart() {
            warn!(target: "mu.node", error = %err, "device_restart_failed");
        }
        info!(
            target: "mu.node",
            datapoints = self.stats.datapoints,
            running_seconds = self.stats.started_at.elapsed().as_secs(),
            "node_shutdown"
        );
    }
}

fn log_device_info(info: &DeviceInfo) {
    let status = &info.status;
    info!(
        target: "mu.node",
        device_id = ?status.id(),
        interval_ms = ?status.measurement_interval(),
        mode = ?status.measurement_mode(),
        tia_gain = ?status.tia_amplification().map(TiaAmplification::gain),
        os_version = info.os_version.as_deref().unwrap_or("unknown"),
        cpu_frequency = info.cpu_frequency.as_deref().unwrap_or("unknown"),
        firmware_version = info.firmware_version.as_deref().unwrap_or("unknown"),
        measurement_config = info.measurement_config.as_deref().unwrap_or("unknown"),
        "device_info"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mu_ingest::ExtraSensors;
    use mu_notify::{NotifyError, Publisher};
    use mu_pipeline::QUEUE_CAPACITY;
    use mu_protocol::MockTransport;
    use std::sync::Mutex;

    const HEADER: &str = "#hd 1\r\n#id 7\r\n#ta 3\r\n#sn 0";
    const DATA: &str =
        "X 250000 1000 2000 3000 215000 400000 2000000 512000 513000 100 500 100000 300 250";

    #[derive(Default)]
    struct RecordingPublisher {
        topics: Mutex<Vec<String>>,
    }

    impl RecordingPublisher {
        fn topics(&self) -> Vec<String> {
            self.topics.lock().expect("topics lock").clone()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<(), NotifyError> {
            self.topics.lock().expect("topics lock").push(topic.to_string());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        rows: Arc<Mutex<Vec<Vec<f64>>>>,
        fail: bool,
    }

    impl MeasurementSink for RecordingSink {
        fn write_row(&mut self, _at: DateTime<Local>, row: &[f64]) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::new("disk full"));
            }
            self.rows.lock().expect("rows lock").push(row.to_vec());
            Ok(())
        }
    }

    struct SoilSensor;

    impl ExtraSensors for SoilSensor {
        fn names(&self) -> Vec<String> {
            vec!["soil_ph".to_string()]
        }

        fn read(&mut self) -> Vec<f64> {
            vec![6.5]
        }
    }

    fn opener(sink: RecordingSink, opened: Arc<Mutex<Vec<Option<i64>>>>) -> StorageOpener {
        Box::new(move |device_id| {
            opened.lock().expect("opened lock").push(device_id);
            Ok(Box::new(sink.clone()) as Box<dyn MeasurementSink>)
        })
    }

    fn node(
        transport: MockTransport,
        sink: RecordingSink,
        publisher: Arc<RecordingPublisher>,
    ) -> SensorNode<MockTransport> {
        node_with(
            transport,
            RecordClassifier::new("rpi0"),
            opener(sink, Arc::default()),
            publisher,
        )
    }

    fn node_with(
        transport: MockTransport,
        classifier: RecordClassifier,
        open_storage: StorageOpener,
        publisher: Arc<RecordingPublisher>,
    ) -> SensorNode<MockTransport> {
        let layout = ColumnLayout::builtin().expect("builtin layout");
        let normalizer = normalizer_for(layout, &classifier);
        SensorNode::new(
            Device::new(transport).with_settle_time(Duration::ZERO),
            classifier,
            normalizer,
            open_storage,
            NodePublisher::new(publisher.clone(), "mu", "rpi0"),
            ThrottledNotifier::new(publisher, "mu", "rpi0", Duration::from_secs(3600)),
            NodeContext::new("rpi0", "rpi0_mu_CYB1", "session-1"),
        )
    }

    #[test]
    fn start_configures_device_then_starts_measurement() {
        let transport = MockTransport::new();
        let mut node = node(
            transport.clone(),
            RecordingSink::default(),
            Arc::new(RecordingPublisher::default()),
        );

        node.start().expect("start");
        let written = transport.written_string();
        assert!(written.starts_with(",ss*"));
        assert!(written.contains(",yy1*"));
        assert!(written.contains(",ya120*"));
        assert!(written.contains(",mi01000*"));
        assert!(written.ends_with(",ms*"));
    }

    #[test]
    fn frames_flow_to_storage_publisher_and_queue() {
        let transport = MockTransport::new();
        let sink = RecordingSink::default();
        let publisher = Arc::new(RecordingPublisher::default());
        let (queue, _receiver) = DeliveryQueue::bounded(QUEUE_CAPACITY);
        let mut node = node(transport.clone(), sink.clone(), publisher.clone())
            .with_queue(Some(queue.clone()));

        node.start().expect("start");
        transport.clear_written();
        transport.inject_frame(HEADER);
        transport.inject_frame(DATA);
        transport.inject_frame(DATA);

        // 注入的数据读完后串口关闭，循环以错误结束。
        let result = node.acquire();
        assert!(matches!(
            result,
            Err(NodeError::Protocol(ProtocolError::TransportClosed))
        ));
        node.shutdown();

        let rows = sink.rows.lock().expect("rows lock");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), node.normalizer.header().len());
        assert_eq!(
            publisher.topics(),
            vec!["mu/rpi0/header", "mu/rpi0/data", "mu/rpi0/data"]
        );
        assert!(queue.is_stopped());
        assert_eq!(node.stats.datapoints, 2);
        let written = transport.written_string();
        assert!(written.ends_with(",mp*,sr*"));
    }

    #[test]
    fn csv_failure_notifies_and_still_enqueues() {
        let transport = MockTransport::new();
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let publisher = Arc::new(RecordingPublisher::default());
        let (queue, _receiver) = DeliveryQueue::bounded(1);
        let mut node = node(transport, sink, publisher.clone()).with_queue(Some(queue.clone()));

        node.start().expect("start");
        node.handle_line(DATA, Local::now());
        node.handle_line(DATA, Local::now());

        let topics = publisher.topics();
        // 限流：同一告警 topic 只发送一次。
        assert_eq!(
            topics.iter().filter(|t| *t == "mu/rpi0/notify/csv_error").count(),
            1
        );
        assert!(topics.contains(&"mu/rpi0/notify/website_error".to_string()));
        assert!(matches!(
            queue.enqueue(DeliveryTask::new(Utc::now(), Default::default())),
            Err(PipelineError::QueueFull { .. })
        ));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let sink = RecordingSink::default();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut node = node(MockTransport::new(), sink.clone(), publisher.clone());

        node.start().expect("start");
        node.handle_line("X 1 two 3", Local::now());
        node.handle_line("X 1 2", Local::now());
        node.handle_line("#a #b #c", Local::now());

        assert!(sink.rows.lock().expect("rows lock").is_empty());
        // 值数不足时仍扇出原始测量，但不落盘。
        assert_eq!(publisher.topics(), vec!["mu/rpi0/data"]);
        assert_eq!(node.stats.datapoints, 0);
    }

    #[test]
    fn stop_flag_ends_acquisition() {
        let transport = MockTransport::new();
        let mut node = node(
            transport.clone(),
            RecordingSink::default(),
            Arc::new(RecordingPublisher::default()),
        );
        transport.inject_frame(DATA);
        node.stop_handle().store(true, Ordering::SeqCst);

        node.acquire().expect("stopped cleanly");
        assert_eq!(transport.pending(), DATA.len() + 3);
    }

    #[test]
    fn storage_is_opened_for_the_reported_device() {
        let transport = MockTransport::new();
        transport.inject_read(b"Status\r\nID21P01000E1N120!3$2Y\r\nOS 1.2, 48MHz, FW: 3.1.\r\n");
        let opened = Arc::new(Mutex::new(Vec::new()));
        let mut node = node_with(
            transport,
            RecordClassifier::new("rpi0"),
            opener(RecordingSink::default(), opened.clone()),
            Arc::new(RecordingPublisher::default()),
        );

        node.start().expect("start");
        assert_eq!(*opened.lock().expect("opened lock"), vec![Some(21)]);
    }

    #[test]
    fn storage_without_status_uses_unknown_id() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let mut node = node_with(
            MockTransport::new(),
            RecordClassifier::new("rpi0"),
            opener(RecordingSink::default(), opened.clone()),
            Arc::new(RecordingPublisher::default()),
        );

        node.start().expect("start");
        assert_eq!(*opened.lock().expect("opened lock"), vec![None]);
    }

    #[test]
    fn storage_failure_aborts_start_before_measuring() {
        let transport = MockTransport::new();
        let mut node = node_with(
            transport.clone(),
            RecordClassifier::new("rpi0"),
            Box::new(|_| Err(StorageError::new("read-only filesystem"))),
            Arc::new(RecordingPublisher::default()),
        );

        assert!(matches!(node.start(), Err(NodeError::Storage(_))));
        assert!(!transport.written_string().contains(",ms*"));
    }

    #[test]
    fn extra_sensor_columns_extend_header_and_rows() {
        let sink = RecordingSink::default();
        let mut node = node_with(
            MockTransport::new(),
            RecordClassifier::with_extra_sensors("rpi0", Box::new(SoilSensor)),
            opener(sink.clone(), Arc::default()),
            Arc::new(RecordingPublisher::default()),
        );

        node.start().expect("start");
        node.handle_line(DATA, Local::now());

        let header = node.normalizer.header();
        assert_eq!(header.last().map(String::as_str), Some("soil_ph"));
        let rows = sink.rows.lock().expect("rows lock");
        assert_eq!(rows[0].len(), header.len());
        assert_eq!(rows[0].last().copied(), Some(6.5));
    }
}
