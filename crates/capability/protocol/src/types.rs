//! 协议相关类型定义

use crate::error::ProtocolError;
use std::collections::BTreeMap;
use std::fmt;

/// 帧起始标记
pub const START_MARKER: u8 = b'A';
/// 帧结束标记
pub const END_MARKER: u8 = b'Z';

/// 一帧解码后的 ASCII 行（不含起止标记与尾部控制字符）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine(String);

impl DecodedLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DecodedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 看门狗类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogKind {
    /// 原始字节活性：是否收到任何数据
    Data,
    /// 帧活性：是否按时出现起止标记
    Frame,
}

impl WatchdogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Frame => "frame",
        }
    }
}

/// 看门狗超时上报（每个整数倍只上报一次）
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogReport {
    pub kind: WatchdogKind,
    /// 超时阶段：等待起始标记或结束标记
    pub waiting_for: u8,
    /// 相对延迟（基准间隔的倍数，保留一位小数）
    pub relative_delay: f64,
}

impl WatchdogReport {
    /// 面向运维的描述文本。
    pub fn message(&self) -> String {
        match (self.kind, self.waiting_for) {
            (WatchdogKind::Data, _) => format!(
                "nothing received from device {} times longer than expected",
                self.relative_delay
            ),
            (WatchdogKind::Frame, START_MARKER) => format!(
                "start marker not found {} times longer than expected",
                self.relative_delay
            ),
            (WatchdogKind::Frame, _) => format!(
                "end marker not found {} times longer than expected",
                self.relative_delay
            ),
        }
    }
}

/// 设备测量模式（`,yn{n}*`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementMode {
    EisOff = 0,
    ImpedanceSpectroscope = 1,
    SignalScope = 2,
    ContMeasFixed = 3,
    ContMeasVariable = 4,
    Frp = 5,
    ContFrp = 6,
}

impl MeasurementMode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// 激励波形量程（`,yy{n}*`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformRange {
    Range1V = 1,
    Range01V = 2,
    Range001V = 3,
}

impl WaveformRange {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// 跨阻放大增益（仅用于解读状态报文）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiaAmplification {
    Gain50 = 0,
    Gain500 = 1,
    Gain5000 = 2,
    Gain50000 = 3,
}

impl TiaAmplification {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Gain50),
            1 => Some(Self::Gain500),
            2 => Some(Self::Gain5000),
            3 => Some(Self::Gain50000),
            _ => None,
        }
    }

    pub fn gain(self) -> u32 {
        match self {
            Self::Gain50 => 50,
            Self::Gain500 => 500,
            Self::Gain5000 => 5_000,
            Self::Gain50000 => 50_000,
        }
    }
}

/// 状态报文键与名称映射
pub const STATUS_KEYS: [(char, &str); 6] = [
    ('D', "ID"),
    ('P', "measurement_interval"),
    ('E', "waveform_range"),
    ('N', "waveform_amplitude"),
    ('!', "measurement_mode"),
    ('$', "tia_amplification"),
];

/// 设备状态报文 `I<key><digits>...Y`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub raw: BTreeMap<char, i64>,
}

impl DeviceStatus {
    /// 解析状态报文；键为非数字字符，其后连续数字累积为值。
    pub fn parse(message: &str) -> Result<Self, ProtocolError> {
        let message = message.trim();
        let body = message
            .strip_prefix('I')
            .and_then(|rest| rest.strip_suffix('Y'))
            .ok_or_else(|| ProtocolError::StatusParse(format!("unexpected format: {message}")))?;

        let mut raw = BTreeMap::new();
        let mut key: Option<char> = None;
        let mut value = String::new();
        for ch in body.chars() {
            if ch.is_ascii_digit() {
                value.push(ch);
                continue;
            }
            if let Some(current) = key {
                if !value.is_empty() {
                    raw.insert(current, parse_status_value(current, &value)?);
                }
            }
            key = Some(ch);
            value.clear();
        }
        if let Some(current) = key {
            if !value.is_empty() {
                raw.insert(current, parse_status_value(current, &value)?);
            }
        }
        Ok(Self { raw })
    }

    /// 按名称查看已知键；缺失的键不出现在结果中。
    pub fn named(&self) -> BTreeMap<&'static str, i64> {
        STATUS_KEYS
            .iter()
            .filter_map(|(key, name)| self.raw.get(key).map(|value| (*name, *value)))
            .collect()
    }

    pub fn id(&self) -> Option<i64> {
        self.raw.get(&'D').copied()
    }

    pub fn measurement_interval(&self) -> Option<i64> {
        self.raw.get(&'P').copied()
    }

    pub fn waveform_range(&self) -> Option<i64> {
        self.raw.get(&'E').copied()
    }

    pub fn waveform_amplitude(&self) -> Option<i64> {
        self.raw.get(&'N').copied()
    }

    pub fn measurement_mode(&self) -> Option<i64> {
        self.raw.get(&'!').copied()
    }

    /// 跨阻放大增益；未知编码返回 `None`。
    pub fn tia_amplification(&self) -> Option<TiaAmplification> {
        self.raw
            .get(&'$')
            .copied()
            .and_then(TiaAmplification::from_code)
    }
}

fn parse_status_value(key: char, value: &str) -> Result<i64, ProtocolError> {
    value
        .parse::<i64>()
        .map_err(|_| ProtocolError::StatusParse(format!("value out of range for {key}: {value}")))
}
