//! 按本地时间轮转的 CSV 存储

use crate::csv_file::{CsvFile, FILE_TIME_FORMAT};
use crate::error::StorageError;
use crate::traits::MeasurementSink;
use chrono::{DateTime, Local, NaiveDate, Timelike};
use std::path::{Path, PathBuf};
use tracing::info;

/// 轮转 CSV 存储
///
/// 本地时间进入轮转小时（`hour % rotation_hours == 0`）且与上次轮转不同时新建文件。
pub struct RotatingCsvStorage {
    dir: PathBuf,
    prefix: String,
    header: Vec<String>,
    rotation_hours: u32,
    current: CsvFile,
    last_rotation: (NaiveDate, u32),
}

impl RotatingCsvStorage {
    pub fn open(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        header: Vec<String>,
        rotation_hours: u32,
        now: DateTime<Local>,
    ) -> Result<Self, StorageError> {
        if rotation_hours == 0 || 24 % rotation_hours != 0 {
            return Err(StorageError::new(format!(
                "rotation hours must divide 24, got {rotation_hours}"
            )));
        }
        let dir = dir.into();
        let prefix = prefix.into();
        let current = CsvFile::create(&dir, &file_name(&prefix, now), &header)?;
        Ok(Self {
            dir,
            prefix,
            header,
            rotation_hours,
            current,
            last_rotation: (now.date_naive(), now.hour()),
        })
    }

    pub fn current_path(&self) -> &Path {
        self.current.path()
    }

    /// 到达轮转时刻时新建文件；返回是否发生了轮转。
    pub fn rotate_if_due(&mut self, now: DateTime<Local>) -> Result<bool, StorageError> {
        let slot = (now.date_naive(), now.hour());
        if now.hour() % self.rotation_hours != 0 || slot == self.last_rotation {
            return Ok(false);
        }
        self.current = CsvFile::create(&self.dir, &file_name(&self.prefix, now), &self.header)?;
        self.last_rotation = slot;
        info!(
            target: "mu.storage",
            path = %self.current.path().display(),
            "csv_rotated"
        );
        Ok(true)
    }
}

impl MeasurementSink for RotatingCsvStorage {
    fn write_row(&mut self, at: DateTime<Local>, row: &[f64]) -> Result<(), StorageError> {
        self.rotate_if_due(at)?;
        self.current.write_row(at, row)
    }
}

/// 按设备 ID 区分的存储目录：`{base} ({id})`，ID 未知时为 `{base} (ID NA)`。
pub fn device_dir(base: &Path, device_id: Option<i64>) -> PathBuf {
    let suffix = match device_id {
        Some(id) => id.to_string(),
        None => "ID NA".to_string(),
    };
    PathBuf::from(format!("{} ({suffix})", base.display()))
}

/// `{prefix}_{%Y_%m_%d-%H_%M_%S}.csv`
pub fn file_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{prefix}_{}.csv", at.format(FILE_TIME_FORMAT))
}
