use chrono::Utc;
use domain::{HeaderRecord, Measurement, MessageKind, Record};
use tracing::{debug, error, warn};

/// 分类错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unrecognized line with {0} '#' markers")]
    Unrecognized(usize),
    #[error("malformed line: {0}")]
    Malformed(String),
}

/// 附加传感器：为每条数据记录追加数值。
pub trait ExtraSensors: Send {
    /// 追加列名，顺序与 [`ExtraSensors::read`] 一致。
    fn names(&self) -> Vec<String>;
    fn read(&mut self) -> Vec<f64>;
}

/// 无附加传感器（默认）。
#[derive(Debug, Default)]
pub struct NoExtraSensors;

impl ExtraSensors for NoExtraSensors {
    fn names(&self) -> Vec<String> {
        Vec::new()
    }

    fn read(&mut self) -> Vec<f64> {
        Vec::new()
    }
}

/// 记录分类器。
///
/// 持有最近一次 Header 给出的设备 ID 与测量模式，后续纯数据行沿用。
pub struct RecordClassifier {
    hostname: String,
    device_id: i64,
    measurement_mode: i64,
    extra_sensors: Box<dyn ExtraSensors>,
}

impl RecordClassifier {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self::with_extra_sensors(hostname, Box::new(NoExtraSensors))
    }

    pub fn with_extra_sensors(
        hostname: impl Into<String>,
        extra_sensors: Box<dyn ExtraSensors>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            device_id: 0,
            measurement_mode: 0,
            extra_sensors,
        }
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn measurement_mode(&self) -> i64 {
        self.measurement_mode
    }

    pub fn extra_sensor_names(&self) -> Vec<String> {
        self.extra_sensors.names()
    }

    /// 分类一行；无法识别或格式错误时记录日志并返回 `None`。
    pub fn classify(&mut self, line: &str) -> Option<Record> {
        self.classify_at(line, Utc::now().timestamp())
    }

    pub fn classify_at(&mut self, line: &str, timestamp: i64) -> Option<Record> {
        debug!(target: "mu.ingest", line, "line_received");
        match self.try_classify_at(line, timestamp) {
            Ok(record) => {
                mu_telemetry::record_record_classified();
                Some(record)
            }
            Err(err @ IngestError::Unrecognized(_)) => {
                warn!(target: "mu.ingest", error = %err, line, "unknown_line_type");
                mu_telemetry::record_record_dropped();
                None
            }
            Err(err) => {
                error!(target: "mu.ingest", error = %err, line, "parse_failed");
                mu_telemetry::record_record_dropped();
                None
            }
        }
    }

    /// 分类一行；失败时粘性状态保持不变。
    pub fn try_classify_at(&mut self, line: &str, timestamp: i64) -> Result<Record, IngestError> {
        match line.matches('#').count() {
            0 => {
                let values = parse_values(line)?;
                Ok(Record::Measurement(self.measurement(
                    MessageKind::Data,
                    timestamp,
                    values,
                )))
            }
            2 => {
                let mut segments = line.split('#');
                let data = segments.next().unwrap_or_default();
                let device_id = parse_meta(segments.next(), "id")?;
                let measurement_mode = parse_meta(segments.next(), "ta")?;
                let values = parse_values(data)?;
                self.device_id = device_id;
                self.measurement_mode = measurement_mode;
                Ok(Record::Measurement(self.measurement(
                    MessageKind::DataWithMeta,
                    timestamp,
                    values,
                )))
            }
            4 => {
                let mut device_id = None;
                let mut measurement_mode = None;
                for subline in line.lines().map(str::trim).filter(|l| l.starts_with('#')) {
                    let mut tokens = subline.split_whitespace();
                    let (Some(key), Some(value)) = (tokens.next(), tokens.next()) else {
                        continue;
                    };
                    match key {
                        "#id" => device_id = Some(parse_int(value)?),
                        "#ta" => measurement_mode = Some(parse_int(value)?),
                        _ => {}
                    }
                }
                let device_id = device_id
                    .ok_or_else(|| IngestError::Malformed("header without #id".to_string()))?;
                let measurement_mode = measurement_mode
                    .ok_or_else(|| IngestError::Malformed("header without #ta".to_string()))?;
                self.device_id = device_id;
                self.measurement_mode = measurement_mode;
                Ok(Record::Header(HeaderRecord {
                    hostname: self.hostname.clone(),
                    device_id,
                    measurement_mode,
                    raw: line.to_string(),
                }))
            }
            other => Err(IngestError::Unrecognized(other)),
        }
    }

    fn measurement(&mut self, kind: MessageKind, timestamp: i64, values: Vec<i64>) -> Measurement {
        Measurement {
            hostname: self.hostname.clone(),
            kind,
            device_id: self.device_id,
            measurement_mode: self.measurement_mode,
            timestamp,
            values,
            extra_sensor_values: self.extra_sensors.read(),
        }
    }
}

/// 首个 token 为行标识，其余为整数测量值。
fn parse_values(data: &str) -> Result<Vec<i64>, IngestError> {
    data.split_whitespace().skip(1).map(parse_int).collect()
}

/// 解析 `id N` / `ta M` 形式的元数据段。
fn parse_meta(segment: Option<&str>, key: &str) -> Result<i64, IngestError> {
    let segment =
        segment.ok_or_else(|| IngestError::Malformed(format!("missing {key} segment")))?;
    let mut tokens = segment.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(found), Some(value)) if found == key => parse_int(value),
        _ => Err(IngestError::Malformed(format!(
            "expected '{key} <value>', got '{}'",
            segment.trim()
        ))),
    }
}

fn parse_int(token: &str) -> Result<i64, IngestError> {
    token
        .parse::<i64>()
        .map_err(|_| IngestError::Malformed(format!("not an integer: {token}")))
}
