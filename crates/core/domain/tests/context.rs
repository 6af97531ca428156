use domain::{HeaderRecord, Measurement, MessageKind, NodeContext, Record};

#[test]
fn node_context_derives_device_from_prefix() {
    let ctx = NodeContext::new("OB-ZAG-0", "OB-ZAG-0_2_CYB1", "session-1");

    assert_eq!(ctx.hostname, "OB-ZAG-0");
    assert_eq!(ctx.device, "CYB1");
    assert_eq!(ctx.session_id, "session-1");
}

#[test]
fn node_context_without_separator_uses_whole_prefix() {
    let ctx = NodeContext::new("rockpi", "ACM0", "session-2");
    assert_eq!(ctx.device, "ACM0");
}

#[test]
fn record_kind_follows_payload() {
    let header = Record::Header(HeaderRecord {
        hostname: "rockpi".to_string(),
        device_id: 7,
        measurement_mode: 3,
        raw: "#id 7".to_string(),
    });
    let data = Record::Measurement(Measurement {
        hostname: "rockpi".to_string(),
        kind: MessageKind::DataWithMeta,
        device_id: 7,
        measurement_mode: 3,
        timestamp: 1_700_000_000,
        values: vec![1, 2, 3],
        extra_sensor_values: Vec::new(),
    });

    assert_eq!(header.kind(), MessageKind::Header);
    assert_eq!(data.kind(), MessageKind::DataWithMeta);
}
