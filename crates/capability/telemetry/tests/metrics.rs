use mu_telemetry::{
    metrics, new_session_id, record_forward_latency_ms, record_queue_full, MetricsSnapshot,
};

#[test]
fn session_ids_are_unique() {
    let first = new_session_id();
    let second = new_session_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_queue_full();
    record_forward_latency_ms(40);
    record_forward_latency_ms(20);
    let after = metrics().snapshot();
    assert!(after.queue_full > before.queue_full);
    assert!(after.forward_latency_ms_count >= before.forward_latency_ms_count + 2);
}

#[test]
fn latency_average_handles_empty_snapshot() {
    let snapshot = MetricsSnapshot::default();
    assert_eq!(snapshot.forward_latency_ms_avg(), 0);
    let snapshot = MetricsSnapshot {
        forward_latency_ms_total: 90,
        forward_latency_ms_count: 3,
        ..MetricsSnapshot::default()
    };
    assert_eq!(snapshot.forward_latency_ms_avg(), 30);
}
