//! 存储层错误类型
//!
//! 封装文件系统与 CSV 编码错误。

#[derive(Debug)]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("io error: {err}"))
    }
}

impl From<csv::Error> for StorageError {
    fn from(err: csv::Error) -> Self {
        Self::new(format!("csv error: {err}"))
    }
}
