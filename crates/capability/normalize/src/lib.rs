//! 测量值标准化：列布局选择与标定换算。

use domain::Measurement;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// 内置默认列布局。
pub const DEFAULT_LAYOUT_YAML: &str = include_str!("../config/data_fields.yaml");

/// 标准化错误。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("missing column {0}: measurement has {1} values")]
    MissingColumn(String, usize),
}

/// 列布局：设备值列（有序，带启用标记）加附加传感器列。
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    device_columns: Vec<(String, bool)>,
    extra_columns: Vec<String>,
}

impl ColumnLayout {
    /// 解析 `name: bool` 有序映射。
    pub fn from_yaml_str(yaml: &str) -> Result<Self, NormalizeError> {
        let mapping: serde_yaml::Mapping = serde_yaml::from_str(yaml)
            .map_err(|err| NormalizeError::InvalidLayout(err.to_string()))?;
        let mut device_columns = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| NormalizeError::InvalidLayout(format!("non-string key: {key:?}")))?
                .to_string();
            let enabled = value.as_bool().ok_or_else(|| {
                NormalizeError::InvalidLayout(format!("{name} must be true or false"))
            })?;
            device_columns.push((name, enabled));
        }
        if device_columns.is_empty() {
            return Err(NormalizeError::InvalidLayout("no columns".to_string()));
        }
        Ok(Self {
            device_columns,
            extra_columns: Vec::new(),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, NormalizeError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// 内置布局。
    pub fn builtin() -> Result<Self, NormalizeError> {
        Self::from_yaml_str(DEFAULT_LAYOUT_YAML)
    }

    pub fn with_extra_columns(mut self, names: Vec<String>) -> Self {
        self.extra_columns = names;
        self
    }

    /// 输出列名（不含 datetime）。
    pub fn header(&self) -> Vec<String> {
        self.device_columns
            .iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(name, _)| name.clone())
            .chain(self.extra_columns.iter().cloned())
            .collect()
    }
}

/// 标准化结果。
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// 与 [`ColumnLayout::header`] 一一对应的 CSV 行。
    pub row: Vec<f64>,
    /// 远端推送字段（仅有限值）。
    pub fields: BTreeMap<String, f64>,
    /// 换算结果非有限值的列。
    pub out_of_range: Vec<String>,
}

/// 标准化器。
#[derive(Debug, Clone)]
pub struct Normalizer {
    layout: ColumnLayout,
}

impl Normalizer {
    pub fn new(layout: ColumnLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    pub fn header(&self) -> Vec<String> {
        self.layout.header()
    }

    pub fn normalize(&self, measurement: &Measurement) -> Result<NormalizedRecord, NormalizeError> {
        let count = measurement.values.len();
        if count < self.layout.device_columns.len() {
            let (missing, _) = &self.layout.device_columns[count];
            return Err(NormalizeError::MissingColumn(missing.clone(), count));
        }

        // 湿度换算依赖外部温度，先换算温度列。
        let temperature = self
            .layout
            .device_columns
            .iter()
            .position(|(name, _)| name == "temp_external")
            .map(|index| calibrate("temp_external", measurement.values[index] as f64, 0.0));

        let mut row = Vec::new();
        let mut fields = BTreeMap::new();
        let mut out_of_range = Vec::new();
        let mut push = |name: &str, value: f64| {
            if value.is_finite() {
                fields.insert(name.to_string(), value);
            } else {
                out_of_range.push(name.to_string());
            }
            row.push(value);
        };

        for (index, (name, enabled)) in self.layout.device_columns.iter().enumerate() {
            if !enabled {
                continue;
            }
            let raw = measurement.values[index] as f64;
            push(name, calibrate(name, raw, temperature.unwrap_or(0.0)));
        }
        for (index, name) in self.layout.extra_columns.iter().enumerate() {
            let value = measurement
                .extra_sensor_values
                .get(index)
                .copied()
                .unwrap_or(f64::NAN);
            push(name, value);
        }

        if !out_of_range.is_empty() {
            debug!(target: "mu.normalize", columns = ?out_of_range, "values_out_of_range");
        }
        Ok(NormalizedRecord {
            row,
            fields,
            out_of_range,
        })
    }
}

/// 标定换算；未知列原样返回。`temp_external` 为已换算的摄氏温度。
pub fn calibrate(name: &str, raw: f64, temp_external: f64) -> f64 {
    match name {
        "temp_external" | "temp_PCB" => round_to(raw / 10_000.0, 2),
        "soil_temperature" => round_to(raw / 10.0, 2),
        "mag_X" | "mag_Y" | "mag_Z" => round_to(raw / 1000.0 * 100.0, 2),
        "light_external" => round_to(raw / 799.4 - 0.75056, 1),
        "humidity_external" => round_to(
            (raw * 3.0 / 4_200_000.0 - 0.1515) / (0.006707256 - 0.0000137376 * temp_external),
            2,
        ),
        "air_pressure" => round_to(raw / 100.0, 2),
        "differential_potential_CH1" | "differential_potential_CH2" => {
            round_to((raw - 512_000.0) / 1000.0, 3)
        }
        "transpiration" => round_to(raw / 1000.0, 2),
        _ => raw,
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
