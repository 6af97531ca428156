//! # 本地存储模块
//!
//! 测量数据按行写入 CSV，文件按本地时间轮转：
//!
//! - [`CsvFile`]：单个文件，创建时写表头 `datetime, <fields...>`
//! - [`RotatingCsvStorage`]：每个轮转周期一个文件，文件名 `{prefix}_{%Y_%m_%d-%H_%M_%S}.csv`
//! - [`MeasurementSink`]：采集循环依赖的写入接口
//! - [`device_dir`]：数据目录按设备 ID 加后缀，不同设备的文件互不混放
//!
//! 以 sudo 运行时（`SUDO_UID`/`SUDO_GID`），新建的目录与文件归还给调用用户。

pub mod csv_file;
pub mod error;
pub mod rotating;
pub mod traits;

pub use csv_file::{CsvFile, FILE_TIME_FORMAT, ROW_TIME_FORMAT};
pub use error::*;
pub use rotating::{RotatingCsvStorage, device_dir, file_name};
pub use traits::*;
