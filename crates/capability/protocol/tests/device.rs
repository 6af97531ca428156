use mu_protocol::{
    parse_device_info, parse_status_response, Device, DeviceSettings, DeviceStatus,
    MeasurementMode, MockTransport, ProtocolError, TiaAmplification, WaveformRange,
};
use std::time::Duration;

fn device() -> (MockTransport, Device<MockTransport>) {
    let transport = MockTransport::new();
    let device = Device::new(transport.clone()).with_settle_time(Duration::ZERO);
    (transport, device)
}

#[test]
fn command_strings_are_formatted() {
    let (transport, mut device) = device();
    device.start_measurement().expect("start");
    device.set_measurement_interval(1000).expect("interval");
    device.set_waveform_amplitude(7).expect("amplitude");
    device.set_waveform_range(WaveformRange::Range01V).expect("range");
    device
        .set_measurement_mode(MeasurementMode::ContMeasFixed)
        .expect("mode");
    device.restart().expect("restart");
    assert_eq!(
        transport.written_string(),
        ",ms*,mi01000*,ya007*,yy2*,yn3*,sr*"
    );
}

#[test]
fn amplitude_out_of_range_is_rejected_without_writing() {
    let (transport, mut device) = device();
    assert!(matches!(
        device.set_waveform_amplitude(0),
        Err(ProtocolError::InvalidArgument(_))
    ));
    assert!(matches!(
        device.set_waveform_amplitude(128),
        Err(ProtocolError::InvalidArgument(_))
    ));
    assert!(matches!(
        device.set_measurement_interval(100_000),
        Err(ProtocolError::InvalidArgument(_))
    ));
    assert!(transport.written().is_empty());
}

#[test]
fn response_is_drained_after_command() {
    let (transport, mut device) = device();
    transport.inject_read(b"OK\r\n");
    let response = device.system_messages().expect("system");
    assert_eq!(response, "OK\r\n");
    assert_eq!(transport.written_string(), ",sy*");
}

#[test]
fn status_is_queried_and_parsed() {
    let (transport, mut device) = device();
    transport.inject_read(b"Status\r\nID21P01000E1N120!3$0Y\r\nOS 1.2, 48MHz, FW: 3.1.\r\n");
    let status = device.query_status().expect("status");
    assert_eq!(status.id(), Some(21));
    assert_eq!(status.measurement_interval(), Some(1000));
    assert_eq!(transport.written_string(), ",ss*");
}

#[test]
fn status_response_without_status_line_fails() {
    assert!(matches!(
        parse_status_response("garbage\r\nmore"),
        Err(ProtocolError::StatusParse(_))
    ));
}

#[test]
fn stop_drains_and_clears_before_command() {
    let (transport, mut device) = device();
    transport.inject_read(b"Apartial");
    device.stop_measurement().expect("stop");
    assert_eq!(transport.written_string(), ",mp*");
    assert_eq!(transport.clear_count(), 1);
    assert_eq!(transport.pending(), 0);
}

#[test]
fn apply_settings_only_sends_differences() {
    let (transport, mut device) = device();
    let current = DeviceStatus::parse("ID1P01000E1N100!3$0Y").expect("status");
    device
        .apply_settings(&DeviceSettings::default(), Some(&current))
        .expect("apply");
    assert_eq!(transport.written_string(), ",ya120*");

    transport.clear_written();
    device
        .apply_settings(&DeviceSettings::default(), None)
        .expect("apply");
    assert_eq!(transport.written_string(), ",yn3*,yy1*,ya120*,mi01000*");
}

#[test]
fn decodes_lines_through_device() {
    let (transport, mut device) = device();
    transport.inject_frame("X 1 2 3");
    assert_eq!(device.next_line().expect("line").as_str(), "X 1 2 3");
}

#[test]
fn device_info_carries_firmware_and_measurement_config() {
    let (transport, mut device) = device();
    transport.inject_read(
        b"Status\r\nID21P01000E1N120!3$2Y\r\nOS 1.2, 48MHz, FW: 3.1.\r\n\
          Ready\r\nConfig => continuous fixed.\r\n",
    );
    let info = device.query_info().expect("info");
    assert_eq!(transport.written_string(), ",ss*");
    assert_eq!(info.status.id(), Some(21));
    assert_eq!(info.status.tia_amplification(), Some(TiaAmplification::Gain5000));
    assert_eq!(info.os_version.as_deref(), Some("OS 1.2"));
    assert_eq!(info.cpu_frequency.as_deref(), Some("48MHz"));
    assert_eq!(info.firmware_version.as_deref(), Some("3.1"));
    assert_eq!(info.measurement_config.as_deref(), Some("continuous fixed"));
}

#[test]
fn device_info_tolerates_missing_system_lines() {
    let info = parse_device_info("ID7Y\r\n").expect("info");
    assert_eq!(info.status.id(), Some(7));
    assert_eq!(info.os_version, None);
    assert_eq!(info.firmware_version, None);
    assert_eq!(info.measurement_config, None);

    let info = parse_device_info("ID7Y\r\nunexpected banner\r\n").expect("info");
    assert_eq!(info.cpu_frequency, None);

    assert!(matches!(
        parse_device_info("OS 1.2, 48MHz, FW: 3.1.\r\n"),
        Err(ProtocolError::StatusParse(_))
    ));
}
