use serde::{Deserialize, Serialize};

/// 一条结构化遥测消息：所有字段可选，缺席字段不参与合并
///
/// 未知的入站键在类型化解码时被丢弃，不会变成动态属性。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPatch {
    #[serde(rename = "fw", default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<u32>,

    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub voltage_mv: Option<i64>,

    #[serde(rename = "mA", default, skip_serializing_if = "Option::is_none")]
    pub current_ma: Option<i64>,

    #[serde(rename = "soc", default, skip_serializing_if = "Option::is_none")]
    pub state_of_charge: Option<i64>,

    #[serde(rename = "sessions", default, skip_serializing_if = "Option::is_none")]
    pub session_count: Option<u32>,

    #[serde(rename = "flashFree", default, skip_serializing_if = "Option::is_none")]
    pub flash_free_bytes: Option<u64>,

    #[serde(rename = "AP", default, skip_serializing_if = "Option::is_none")]
    pub access_point: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl TelemetryPatch {
    /// 消息是否携带同步字段（携带时需要重算派生进度/速度）
    pub fn carries_sync(&self) -> bool {
        self.sync.is_some()
    }
}
