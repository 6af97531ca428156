use crate::error::CollectorError;
use api_contract::TIMESTAMP_FORMAT;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// 推送时间戳：结构化时间或 `%Y-%m-%d %H:%M:%S` 字符串（视为 UTC）。
#[derive(Debug, Clone, PartialEq)]
pub enum PushTimestamp {
    At(DateTime<Utc>),
    Text(String),
}

impl<Tz: TimeZone> From<DateTime<Tz>> for PushTimestamp {
    fn from(value: DateTime<Tz>) -> Self {
        Self::At(value.with_timezone(&Utc))
    }
}

impl From<&str> for PushTimestamp {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PushTimestamp {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// 校验并格式化为远端要求的 UTC 字符串。
pub fn validate_timestamp(timestamp: &PushTimestamp) -> Result<String, CollectorError> {
    match timestamp {
        PushTimestamp::At(at) => Ok(at.format(TIMESTAMP_FORMAT).to_string()),
        PushTimestamp::Text(text) => NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .map(|_| text.clone())
            .map_err(|err| CollectorError::InvalidTimestamp(format!("{text}: {err}"))),
    }
}
