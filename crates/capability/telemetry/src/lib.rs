//! 日志初始化、会话 ID 与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub frames_decoded: u64,
    pub frames_discarded: u64,
    pub watchdog_reports: u64,
    pub records_classified: u64,
    pub records_dropped: u64,
    pub csv_rows_written: u64,
    pub csv_write_failure: u64,
    pub queue_enqueued: u64,
    pub queue_full: u64,
    pub forward_success: u64,
    pub forward_failure: u64,
    pub forward_timeout: u64,
    pub forward_latency_ms_total: u64,
    pub forward_latency_ms_count: u64,
}

/// 进程级计数指标。
pub struct TelemetryMetrics {
    frames_decoded: AtomicU64,
    frames_discarded: AtomicU64,
    watchdog_reports: AtomicU64,
    records_classified: AtomicU64,
    records_dropped: AtomicU64,
    csv_rows_written: AtomicU64,
    csv_write_failure: AtomicU64,
    queue_enqueued: AtomicU64,
    queue_full: AtomicU64,
    forward_success: AtomicU64,
    forward_failure: AtomicU64,
    forward_timeout: AtomicU64,
    forward_latency_ms_total: AtomicU64,
    forward_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            frames_decoded: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            watchdog_reports: AtomicU64::new(0),
            records_classified: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            csv_rows_written: AtomicU64::new(0),
            csv_write_failure: AtomicU64::new(0),
            queue_enqueued: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
            forward_success: AtomicU64::new(0),
            forward_failure: AtomicU64::new(0),
            forward_timeout: AtomicU64::new(0),
            forward_latency_ms_total: AtomicU64::new(0),
            forward_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            watchdog_reports: self.watchdog_reports.load(Ordering::Relaxed),
            records_classified: self.records_classified.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            csv_rows_written: self.csv_rows_written.load(Ordering::Relaxed),
            csv_write_failure: self.csv_write_failure.load(Ordering::Relaxed),
            queue_enqueued: self.queue_enqueued.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            forward_success: self.forward_success.load(Ordering::Relaxed),
            forward_failure: self.forward_failure.load(Ordering::Relaxed),
            forward_timeout: self.forward_timeout.load(Ordering::Relaxed),
            forward_latency_ms_total: self.forward_latency_ms_total.load(Ordering::Relaxed),
            forward_latency_ms_count: self.forward_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    /// 平均转发耗时（毫秒），无样本时为 0。
    pub fn forward_latency_ms_avg(&self) -> u64 {
        self.forward_latency_ms_total
            .checked_div(self.forward_latency_ms_count)
            .unwrap_or(0)
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的采集会话 ID。
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录完整帧解码次数。
pub fn record_frame_decoded() {
    metrics().frames_decoded.fetch_add(1, Ordering::Relaxed);
}

/// 记录超长帧丢弃次数。
pub fn record_frame_discarded() {
    metrics().frames_discarded.fetch_add(1, Ordering::Relaxed);
}

/// 记录看门狗超时上报次数。
pub fn record_watchdog_report() {
    metrics().watchdog_reports.fetch_add(1, Ordering::Relaxed);
}

/// 记录分类成功次数。
pub fn record_record_classified() {
    metrics().records_classified.fetch_add(1, Ordering::Relaxed);
}

/// 记录无法识别/格式错误的记录次数。
pub fn record_record_dropped() {
    metrics().records_dropped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_csv_row_written() {
    metrics().csv_rows_written.fetch_add(1, Ordering::Relaxed);
}

pub fn record_csv_write_failure() {
    metrics().csv_write_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录入队成功次数。
pub fn record_queue_enqueued() {
    metrics().queue_enqueued.fetch_add(1, Ordering::Relaxed);
}

/// 记录队列满丢弃次数。
pub fn record_queue_full() {
    metrics().queue_full.fetch_add(1, Ordering::Relaxed);
}

/// 记录转发成功次数。
pub fn record_forward_success() {
    metrics().forward_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录转发失败次数（含超时）。
pub fn record_forward_failure() {
    metrics().forward_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录转发硬超时次数。
pub fn record_forward_timeout() {
    metrics().forward_timeout.fetch_add(1, Ordering::Relaxed);
}

/// 记录单次转发耗时（毫秒）。
pub fn record_forward_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .forward_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .forward_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
