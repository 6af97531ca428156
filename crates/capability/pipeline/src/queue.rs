use crate::{Forwarder, PipelineError, SuccessWindow};
use domain::DeliveryTask;
use mu_telemetry::{
    record_forward_failure, record_forward_latency_ms, record_forward_success,
    record_forward_timeout, record_queue_enqueued, record_queue_full,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const QUEUE_CAPACITY: usize = 10;

enum QueueMessage {
    Task(DeliveryTask),
    Stop,
}

fn lock_window(window: &Mutex<SuccessWindow>) -> MutexGuard<'_, SuccessWindow> {
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 生产端：有界、非阻塞。
#[derive(Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<QueueMessage>,
    stop: Arc<AtomicBool>,
    window: Arc<Mutex<SuccessWindow>>,
}

/// 消费端，交给 [`ForwardingWorker::spawn`]。
pub struct QueueReceiver {
    receiver: mpsc::Receiver<QueueMessage>,
    stop: Arc<AtomicBool>,
    window: Arc<Mutex<SuccessWindow>>,
}

impl DeliveryQueue {
    pub fn bounded(capacity: usize) -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let window = Arc::new(Mutex::new(SuccessWindow::default()));
        (
            Self {
                sender,
                stop: stop.clone(),
                window: window.clone(),
            },
            QueueReceiver {
                receiver,
                stop,
                window,
            },
        )
    }

    /// 创建默认容量的队列并启动后台转发（需在 tokio 运行时内调用）。
    pub fn start(forwarder: Arc<dyn Forwarder>, deadline: Duration) -> (Self, ForwardingWorker) {
        let (queue, receiver) = Self::bounded(QUEUE_CAPACITY);
        let worker = ForwardingWorker::spawn(receiver, forwarder, deadline);
        (queue, worker)
    }

    /// 非阻塞投递。成功时返回当前失败率；队列满时立即失败并附带失败率。
    pub fn enqueue(&self, task: DeliveryTask) -> Result<f64, PipelineError> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(PipelineError::Closed);
        }
        let ratio = self.failure_ratio();
        match self.sender.try_send(QueueMessage::Task(task)) {
            Ok(()) => {
                record_queue_enqueued();
                Ok(ratio)
            }
            Err(TrySendError::Full(_)) => {
                record_queue_full();
                Err(PipelineError::QueueFull { ratio })
            }
            Err(TrySendError::Closed(_)) => Err(PipelineError::Closed),
        }
    }

    pub fn failure_ratio(&self) -> f64 {
        lock_window(&self.window).failure_ratio()
    }

    /// 已记录的转发结果数（不超过窗口容量）。
    pub fn recorded_outcomes(&self) -> usize {
        lock_window(&self.window).len()
    }

    /// 置停止标志并尽力投递停止哨兵。队列满时由标志保证停止。
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.sender.try_send(QueueMessage::Stop).is_err() {
            debug!(target: "mu.pipeline", "stop_sentinel_not_queued");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// 后台转发任务句柄。
pub struct ForwardingWorker {
    handle: JoinHandle<()>,
}

impl ForwardingWorker {
    pub fn spawn(receiver: QueueReceiver, forwarder: Arc<dyn Forwarder>, deadline: Duration) -> Self {
        let handle = tokio::spawn(run_worker(receiver, forwarder, deadline));
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待转发任务退出。
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            error!(target: "mu.pipeline", error = %err, "forward_worker_join_failed");
        }
    }
}

async fn run_worker(mut receiver: QueueReceiver, forwarder: Arc<dyn Forwarder>, deadline: Duration) {
    info!(target: "mu.pipeline", deadline_ms = deadline.as_millis() as u64, "forward_worker_started");
    while let Some(message) = receiver.receiver.recv().await {
        let task = match message {
            QueueMessage::Task(task) => task,
            QueueMessage::Stop => break,
        };
        if receiver.stop.load(Ordering::SeqCst) {
            break;
        }
        let success = forward_once(forwarder.clone(), task, deadline).await;
        lock_window(&receiver.window).record(success);
    }
    info!(target: "mu.pipeline", "forward_worker_stopped");
}

/// 在独立任务中执行一次转发：超时即中止，panic 记为失败。
async fn forward_once(forwarder: Arc<dyn Forwarder>, task: DeliveryTask, deadline: Duration) -> bool {
    let started_at = Instant::now();
    let mut handle = tokio::spawn(async move { forwarder.forward(task).await });
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(Ok(()))) => {
            record_forward_success();
            record_forward_latency_ms(started_at.elapsed().as_millis() as u64);
            true
        }
        Ok(Ok(Err(err))) => {
            record_forward_failure();
            debug!(target: "mu.pipeline", error = %err, "forward_failed");
            false
        }
        Ok(Err(err)) => {
            record_forward_failure();
            error!(target: "mu.pipeline", error = %err, "forward_task_panicked");
            false
        }
        Err(_) => {
            handle.abort();
            record_forward_failure();
            record_forward_timeout();
            warn!(
                target: "mu.pipeline",
                deadline_ms = deadline.as_millis() as u64,
                "forward_timeout"
            );
            false
        }
    }
}
