use crate::{CollectorApi, CollectorError};
use api_contract::{DataField, DataFieldSpec};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// 随程序发布的远端数据字段定义。
pub const DEFAULT_REMOTE_FIELDS_YAML: &str = include_str!("../config/remote_fields.yaml");

/// 解析 `field: {show, name, unit}` 形式的 YAML。
pub fn parse_data_field_specs(
    yaml: &str,
) -> Result<BTreeMap<String, DataFieldSpec>, CollectorError> {
    serde_yaml::from_str(yaml).map_err(|err| CollectorError::Config(err.to_string()))
}

/// 将 `show: true` 的字段注册到远端，已存在的 handle 跳过。
///
/// 单个字段失败只记录日志，返回成功新增的数量。
pub async fn register_data_fields(
    api: &dyn CollectorApi,
    specs: &BTreeMap<String, DataFieldSpec>,
) -> Result<usize, CollectorError> {
    let existing = api.list_data_fields(true).await?;
    let mut added = 0;
    for (handle, spec) in specs.iter().filter(|(_, spec)| spec.show) {
        if existing.iter().any(|field| &field.handle == handle) {
            continue;
        }
        let field = DataField {
            handle: handle.clone(),
            name: spec.name.clone(),
            unit: spec.unit.clone(),
        };
        match api.add_data_field(&field).await {
            Ok(()) => added += 1,
            Err(err) => {
                warn!(target: "mu.collector", handle = %handle, error = %err, "data_field_add_failed")
            }
        }
    }
    info!(target: "mu.collector", added, "data_fields_registered");
    Ok(added)
}
