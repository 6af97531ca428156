//! 节点运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 节点运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub serial_port: String,
    pub baudrate: u32,
    pub hostname: String,
    pub meas_interval_ms: u64,
    pub csv_dir: String,
    pub file_prefix: String,
    pub csv_rotation_hours: u32,
    pub data_fields_path: Option<String>,
    pub api_url: Option<String>,
    pub api_auth: Option<String>,
    pub api_nodes: Vec<String>,
    pub api_display_name: Option<String>,
    pub api_push_timeout_ms: u64,
    pub api_read_timeout_ms: u64,
    pub api_max_retries: u32,
    pub api_backoff_ms: u64,
    pub mqtt_host: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_topic_prefix: String,
    pub notify_min_interval_seconds: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let serial_port = env::var("MU_SERIAL_PORT")
            .map_err(|_| ConfigError::Missing("MU_SERIAL_PORT".to_string()))?;
        let baudrate = read_u32_with_default("MU_BAUDRATE", 460_800)?;
        let hostname = read_optional("MU_HOSTNAME").unwrap_or_else(system_hostname);
        let meas_interval_ms = read_u64_with_default("MU_MEAS_INTERVAL_MS", 1000)?;
        // 设备命令 `,mi` 只接受 5 位毫秒数。
        if meas_interval_ms == 0 || meas_interval_ms > 99_999 {
            return Err(ConfigError::Invalid(
                "MU_MEAS_INTERVAL_MS".to_string(),
                meas_interval_ms.to_string(),
            ));
        }
        let csv_dir = env::var("MU_CSV_DIR").unwrap_or_else(|_| "measurements".to_string());
        let file_prefix =
            read_optional("MU_FILE_PREFIX").unwrap_or_else(|| format!("{hostname}_mu"));
        let csv_rotation_hours = read_u32_with_default("MU_CSV_ROTATION_HOURS", 12)?;
        if csv_rotation_hours == 0 || 24 % csv_rotation_hours != 0 {
            return Err(ConfigError::Invalid(
                "MU_CSV_ROTATION_HOURS".to_string(),
                csv_rotation_hours.to_string(),
            ));
        }
        let data_fields_path = read_optional("MU_DATA_FIELDS_PATH");
        let api_url = read_optional("MU_API_URL").map(|url| url.trim_end_matches('/').to_string());
        let api_auth = read_optional("MU_API_AUTH");
        let api_nodes = read_list("MU_API_NODES");
        let api_display_name = read_optional("MU_API_DISPLAY_NAME");
        let api_push_timeout_ms = read_u64_with_default("MU_API_PUSH_TIMEOUT_MS", meas_interval_ms)?;
        let api_read_timeout_ms = read_u64_with_default("MU_API_READ_TIMEOUT_MS", 10_000)?;
        let api_max_retries = read_u32_with_default("MU_API_MAX_RETRIES", 3)?;
        let api_backoff_ms = read_u64_with_default("MU_API_BACKOFF_MS", 500)?;
        let mqtt_host = read_optional("MU_MQTT_HOST");
        let mqtt_port = read_u16_with_default("MU_MQTT_PORT", 1883)?;
        let mqtt_topic_prefix = env::var("MU_MQTT_TOPIC_PREFIX")
            .map(|prefix| prefix.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| "mu".to_string());
        let notify_min_interval_seconds =
            read_u64_with_default("MU_NOTIFY_MIN_INTERVAL_SECONDS", 3 * 60 * 60)?;

        Ok(Self {
            serial_port,
            baudrate,
            hostname,
            meas_interval_ms,
            csv_dir,
            file_prefix,
            csv_rotation_hours,
            data_fields_path,
            api_url,
            api_auth,
            api_nodes,
            api_display_name,
            api_push_timeout_ms,
            api_read_timeout_ms,
            api_max_retries,
            api_backoff_ms,
            mqtt_host,
            mqtt_port,
            mqtt_topic_prefix,
            notify_min_interval_seconds,
        })
    }
}

fn system_hostname() -> String {
    if let Ok(value) = env::var("HOSTNAME") {
        if !value.is_empty() {
            return value;
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|value| value.trim().to_string())
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

/// 逗号分隔列表，忽略空项。
fn read_list(key: &str) -> Vec<String> {
    read_optional(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
