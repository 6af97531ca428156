//! 设备控制命令与状态查询
//!
//! 所有命令均为阻塞调用，应在采集线程内执行。响应通过“等待稳定时间后读空缓冲区”获取。

use crate::error::ProtocolError;
use crate::frame::FrameDecoder;
use crate::transport::Transport;
use crate::types::{DecodedLine, DeviceStatus, MeasurementMode, WatchdogReport, WaveformRange};
use std::time::Duration;
use tracing::{debug, info};

/// 命令发出后等待设备响应的时间
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(500);

const MIN_AMPLITUDE: u8 = 1;
const MAX_AMPLITUDE: u8 = 127;
const MAX_INTERVAL_MS: u64 = 99_999;

/// 节点期望的设备设置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSettings {
    pub mode: MeasurementMode,
    pub range: WaveformRange,
    pub amplitude: u8,
    pub interval_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            mode: MeasurementMode::ContMeasFixed,
            range: WaveformRange::Range1V,
            amplitude: 120,
            interval_ms: 1000,
        }
    }
}

/// 测量设备
pub struct Device<T: Transport> {
    decoder: FrameDecoder<T>,
    settle_time: Duration,
}

impl<T: Transport> Device<T> {
    pub fn new(transport: T) -> Self {
        Self {
            decoder: FrameDecoder::new(transport),
            settle_time: DEFAULT_SETTLE_TIME,
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn decoder_mut(&mut self) -> &mut FrameDecoder<T> {
        &mut self.decoder
    }

    pub fn next_line(&mut self) -> Result<DecodedLine, ProtocolError> {
        self.decoder.next_line()
    }

    pub fn take_reports(&mut self) -> Vec<WatchdogReport> {
        self.decoder.take_reports()
    }

    /// 请求状态报文（`,ss*`），返回原始响应。
    pub fn request_status(&mut self) -> Result<String, ProtocolError> {
        self.send(",ss*")?;
        self.read_response()
    }

    /// 请求并解析状态报文。
    pub fn query_status(&mut self) -> Result<DeviceStatus, ProtocolError> {
        self.query_info().map(|info| info.status)
    }

    /// 请求状态报文，并解读其后的系统与测量配置信息。
    pub fn query_info(&mut self) -> Result<DeviceInfo, ProtocolError> {
        let response = self.request_status()?;
        debug!(target: "mu.device", response = %response, "status_response");
        parse_device_info(&response)
    }

    /// 请求系统消息（`,sy*`）。
    pub fn system_messages(&mut self) -> Result<String, ProtocolError> {
        self.send(",sy*")?;
        self.read_response()
    }

    pub fn restart(&mut self) -> Result<(), ProtocolError> {
        self.send(",sr*")
    }

    pub fn start_measurement(&mut self) -> Result<(), ProtocolError> {
        self.send(",ms*")
    }

    /// 停止测量：先读空未处理的输出并清空缓冲区。
    pub fn stop_measurement(&mut self) -> Result<(), ProtocolError> {
        std::thread::sleep(self.settle_time * 2);
        let pending = self.read_response()?;
        debug!(target: "mu.device", pending_len = pending.len(), "stop_drained");
        self.decoder.transport_mut().clear_buffers()?;
        self.decoder.reset();
        self.send(",mp*")
    }

    /// 设置采样间隔（毫秒），同时更新两个看门狗的基准间隔。
    pub fn set_measurement_interval(&mut self, interval_ms: u64) -> Result<String, ProtocolError> {
        if interval_ms == 0 || interval_ms > MAX_INTERVAL_MS {
            return Err(ProtocolError::InvalidArgument(format!(
                "measurement interval must be 1-{MAX_INTERVAL_MS} ms, got {interval_ms}"
            )));
        }
        self.decoder.update_interval(interval_ms as f64 / 1000.0);
        self.send(&format!(",mi{interval_ms:05}*"))?;
        self.read_response()
    }

    pub fn set_waveform_amplitude(&mut self, amplitude: u8) -> Result<String, ProtocolError> {
        if !(MIN_AMPLITUDE..=MAX_AMPLITUDE).contains(&amplitude) {
            return Err(ProtocolError::InvalidArgument(format!(
                "waveform amplitude must be {MIN_AMPLITUDE}-{MAX_AMPLITUDE}, got {amplitude}"
            )));
        }
        self.send(&format!(",ya{amplitude:03}*"))?;
        self.read_response()
    }

    pub fn set_waveform_range(&mut self, range: WaveformRange) -> Result<String, ProtocolError> {
        self.send(&format!(",yy{}*", range.code()))?;
        self.read_response()
    }

    pub fn set_measurement_mode(&mut self, mode: MeasurementMode) -> Result<String, ProtocolError> {
        self.send(&format!(",yn{}*", mode.code()))?;
        self.read_response()
    }

    /// 仅下发与当前状态不一致的设置；状态未知时全部下发。
    pub fn apply_settings(
        &mut self,
        settings: &DeviceSettings,
        current: Option<&DeviceStatus>,
    ) -> Result<(), ProtocolError> {
        let differs = |value: Option<i64>, wanted: i64| value != Some(wanted);

        if differs(current.and_then(DeviceStatus::measurement_mode), settings.mode.code() as i64) {
            self.set_measurement_mode(settings.mode)?;
        }
        if differs(current.and_then(DeviceStatus::waveform_range), settings.range.code() as i64) {
            self.set_waveform_range(settings.range)?;
        }
        if differs(current.and_then(DeviceStatus::waveform_amplitude), settings.amplitude as i64) {
            self.set_waveform_amplitude(settings.amplitude)?;
        }
        if differs(
            current.and_then(DeviceStatus::measurement_interval),
            settings.interval_ms as i64,
        ) {
            self.set_measurement_interval(settings.interval_ms)?;
        } else {
            // 设备已是目标间隔，但看门狗仍需按该间隔计算。
            self.decoder
                .update_interval(settings.interval_ms as f64 / 1000.0);
        }
        info!(
            target: "mu.device",
            mode = settings.mode.code(),
            range = settings.range.code(),
            amplitude = settings.amplitude,
            interval_ms = settings.interval_ms,
            "device_configured"
        );
        Ok(())
    }

    fn send(&mut self, command: &str) -> Result<(), ProtocolError> {
        debug!(target: "mu.device", command, "command_sent");
        self.decoder.transport_mut().write_all(command.as_bytes())
    }

    fn read_response(&mut self) -> Result<String, ProtocolError> {
        if !self.settle_time.is_zero() {
            std::thread::sleep(self.settle_time);
        }
        let bytes = self.decoder.transport_mut().drain_available()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// `,ss*` 响应的解读结果。状态行之外的字段缺失时为 `None`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub status: DeviceStatus,
    pub os_version: Option<String>,
    pub cpu_frequency: Option<String>,
    pub firmware_version: Option<String>,
    pub measurement_config: Option<String>,
}

/// 从 `,ss*` 的多行响应中找到状态行并解析。
pub fn parse_status_response(response: &str) -> Result<DeviceStatus, ProtocolError> {
    parse_device_info(response).map(|info| info.status)
}

/// 解析状态行，以及紧随其后的 `OS, CPU, FW: x.` 行和 `... => <config>.` 行。
pub fn parse_device_info(response: &str) -> Result<DeviceInfo, ProtocolError> {
    let lines: Vec<&str> = response.split("\r\n").map(str::trim).collect();
    let status_index = lines
        .iter()
        .position(|line| line.starts_with('I') && line.ends_with('Y'))
        .ok_or_else(|| ProtocolError::StatusParse("no status line in response".to_string()))?;

    let mut info = DeviceInfo {
        status: DeviceStatus::parse(lines[status_index])?,
        ..DeviceInfo::default()
    };
    let rest = &lines[status_index + 1..];

    if let Some(line) = rest.first() {
        if let [os, cpu, version] = line.split(", ").collect::<Vec<_>>().as_slice() {
            info.os_version = Some(os.to_string());
            info.cpu_frequency = Some(cpu.to_string());
            info.firmware_version = version
                .rsplit(": ")
                .next()
                .map(|v| v.trim_end_matches('.').to_string());
        }
    }
    info.measurement_config = rest.iter().find_map(|line| {
        line.rsplit_once("=> ")
            .map(|(_, config)| config.trim_end_matches('.').to_string())
    });
    Ok(info)
}
