//! 单个 CSV 文件

use crate::error::StorageError;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// CSV 中 datetime 列格式（本地时间）
pub const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// 文件名中的时间格式
pub const FILE_TIME_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";

/// 单个 CSV 文件：创建时写入表头，之后逐行追加。
pub struct CsvFile {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvFile {
    /// 在 `dir` 下创建文件并写入 `datetime` + `header`。
    pub fn create(dir: &Path, file_name: &str, header: &[String]) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(std::iter::once("datetime").chain(header.iter().map(String::as_str)))?;
        writer.flush()?;
        fix_ownership(dir, &path);
        info!(target: "mu.storage", path = %path.display(), "csv_file_created");
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_row(&mut self, at: DateTime<Local>, row: &[f64]) -> Result<(), StorageError> {
        let datetime = at.format(ROW_TIME_FORMAT).to_string();
        self.writer.write_record(
            std::iter::once(datetime).chain(row.iter().map(|value| value.to_string())),
        )?;
        self.writer.flush()?;
        Ok(())
    }
}

/// 以 sudo 运行时把目录与文件归还给调用用户。
#[cfg(unix)]
fn fix_ownership(dir: &Path, path: &Path) {
    let (Ok(uid), Ok(gid)) = (std::env::var("SUDO_UID"), std::env::var("SUDO_GID")) else {
        return;
    };
    let (Ok(uid), Ok(gid)) = (uid.parse::<u32>(), gid.parse::<u32>()) else {
        warn!(target: "mu.storage", "sudo_ids_invalid");
        return;
    };
    for target in [dir, path] {
        if let Err(err) = std::os::unix::fs::chown(target, Some(uid), Some(gid)) {
            warn!(
                target: "mu.storage",
                path = %target.display(),
                error = %err,
                "chown_failed"
            );
        }
    }
}

#[cfg(not(unix))]
fn fix_ownership(_dir: &Path, _path: &Path) {}
