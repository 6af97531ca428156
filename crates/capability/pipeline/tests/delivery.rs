use async_trait::async_trait;
use chrono::Utc;
use domain::DeliveryTask;
use mu_pipeline::{DeliveryQueue, Forwarder, ForwardingWorker, PipelineError, QUEUE_CAPACITY};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn task(value: f64) -> DeliveryTask {
    DeliveryTask::new(Utc::now(), BTreeMap::from([("value".to_string(), value)]))
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

/// 按开关决定挂起（超时）或立即成功。
#[derive(Default)]
struct SwitchForwarder {
    hang: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl Forwarder for SwitchForwarder {
    async fn forward(&self, _task: DeliveryTask) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(())
    }
}

/// 每个任务都等待放行。
#[derive(Default)]
struct GatedForwarder {
    gate: Notify,
    started: AtomicUsize,
    finished: AtomicUsize,
}

#[async_trait]
impl Forwarder for GatedForwarder {
    async fn forward(&self, _task: DeliveryTask) -> Result<(), PipelineError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PanicOnceForwarder {
    panicked: AtomicBool,
}

#[async_trait]
impl Forwarder for PanicOnceForwarder {
    async fn forward(&self, _task: DeliveryTask) -> Result<(), PipelineError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("forwarder exploded");
        }
        Ok(())
    }
}

struct AlwaysFails;

#[async_trait]
impl Forwarder for AlwaysFails {
    async fn forward(&self, _task: DeliveryTask) -> Result<(), PipelineError> {
        Err(PipelineError::Forward("connection refused".to_string()))
    }
}

#[tokio::test]
async fn enqueue_beyond_capacity_fails_immediately() {
    let (queue, _receiver) = DeliveryQueue::bounded(QUEUE_CAPACITY);
    for i in 0..QUEUE_CAPACITY {
        assert_eq!(queue.enqueue(task(i as f64)).expect("within capacity"), 0.0);
    }
    let err = queue.enqueue(task(99.0)).expect_err("queue full");
    assert!(matches!(err, PipelineError::QueueFull { ratio } if ratio == 0.0));
}

#[tokio::test]
async fn timeouts_fill_window_and_worker_survives() {
    let forwarder = Arc::new(SwitchForwarder::default());
    forwarder.hang.store(true, Ordering::SeqCst);
    let (queue, worker) = DeliveryQueue::start(forwarder.clone(), Duration::from_millis(20));

    for i in 0..10 {
        queue.enqueue(task(i as f64)).expect("enqueue");
    }
    wait_until(|| queue.recorded_outcomes() == 10).await;
    assert_eq!(queue.failure_ratio(), 1.0);
    assert!(!worker.is_finished());

    forwarder.hang.store(false, Ordering::SeqCst);
    let ratio = queue.enqueue(task(10.0)).expect("enqueue after timeouts");
    assert_eq!(ratio, 1.0);
    wait_until(|| queue.failure_ratio() < 1.0).await;
    assert!((queue.failure_ratio() - 0.9).abs() < 1e-9);
    assert_eq!(forwarder.calls.load(Ordering::SeqCst), 11);

    queue.stop();
    worker.join().await;
}

#[tokio::test]
async fn panicking_forwarder_is_recorded_as_failure() {
    let forwarder = Arc::new(PanicOnceForwarder {
        panicked: AtomicBool::new(false),
    });
    let (queue, worker) = DeliveryQueue::start(forwarder, Duration::from_secs(1));

    queue.enqueue(task(1.0)).expect("first");
    queue.enqueue(task(2.0)).expect("second");
    wait_until(|| queue.recorded_outcomes() == 2).await;
    assert!((queue.failure_ratio() - 0.5).abs() < 1e-9);
    assert!(!worker.is_finished());

    queue.stop();
    worker.join().await;
}

#[tokio::test]
async fn forward_errors_raise_failure_ratio() {
    let (queue, worker) = DeliveryQueue::start(Arc::new(AlwaysFails), Duration::from_secs(1));
    for i in 0..3 {
        queue.enqueue(task(i as f64)).expect("enqueue");
    }
    wait_until(|| queue.recorded_outcomes() == 3).await;
    let ratio = queue.enqueue(task(3.0)).expect("ratio reported");
    assert_eq!(ratio, 1.0);

    queue.stop();
    worker.join().await;
}

#[tokio::test]
async fn no_task_is_processed_after_stop() {
    let forwarder = Arc::new(GatedForwarder::default());
    let (queue, receiver) = DeliveryQueue::bounded(QUEUE_CAPACITY);
    let worker = ForwardingWorker::spawn(receiver, forwarder.clone(), Duration::from_secs(5));

    queue.enqueue(task(0.0)).expect("in flight");
    wait_until(|| forwarder.started.load(Ordering::SeqCst) == 1).await;
    // 填满队列，停止哨兵无法入队，只能依靠停止标志。
    for i in 1..=QUEUE_CAPACITY {
        queue.enqueue(task(i as f64)).expect("fill");
    }
    queue.stop();
    assert!(queue.is_stopped());
    assert!(matches!(queue.enqueue(task(42.0)), Err(PipelineError::Closed)));

    forwarder.gate.notify_one();
    worker.join().await;
    assert_eq!(forwarder.started.load(Ordering::SeqCst), 1);
    assert_eq!(forwarder.finished.load(Ordering::SeqCst), 1);
}
