use fleet_types::SensorRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 快照应答中的一行：设备标识加字段名到字符串值的映射
///
/// 所有值都以字符串传输，由调用方按已知数值字段重新取型。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// 快照应答
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub data: Vec<SnapshotRow>,
}

impl SnapshotRow {
    /// 把一条状态记录展开为字符串字段行
    pub fn from_record(id: &str, record: &SensorRecord) -> Self {
        let mut fields = HashMap::new();
        fields.insert("fw".to_string(), record.firmware_version.to_string());
        fields.insert("v".to_string(), record.voltage_mv.to_string());
        fields.insert("mA".to_string(), record.current_ma.to_string());
        fields.insert("soc".to_string(), record.state_of_charge.to_string());
        fields.insert("sessions".to_string(), record.session_count.to_string());
        fields.insert("flashFree".to_string(), record.flash_free_bytes.to_string());
        if let Some(ap) = &record.access_point {
            fields.insert("AP".to_string(), ap.clone());
        }
        fields.insert("sync".to_string(), record.sync.to_string());
        fields.insert("sent".to_string(), record.sent.to_string());
        fields.insert("total".to_string(), record.total.to_string());
        fields.insert("progress".to_string(), record.progress.to_string());
        fields.insert("speed".to_string(), record.speed_kbps.to_string());
        fields.insert("updateAge".to_string(), record.update_age_secs.to_string());
        fields.insert(
            "fwPending".to_string(),
            u8::from(record.firmware_pending).to_string(),
        );
        if let Some(line) = record.generic_messages.front() {
            fields.insert("genericMessage".to_string(), line.clone());
        }

        Self {
            id: id.to_string(),
            fields,
        }
    }

    /// 按已知字段类型把字符串行还原为状态记录
    ///
    /// 无法解析的值回落到字段的文档化默认值。
    pub fn to_record(&self) -> SensorRecord {
        let mut record = SensorRecord {
            firmware_version: self.parse_or_default("fw"),
            voltage_mv: self.parse_or_default("v"),
            current_ma: self.parse_or_default("mA"),
            state_of_charge: self.parse_or_default("soc"),
            session_count: self.parse_or_default("sessions"),
            flash_free_bytes: self.parse_or_default("flashFree"),
            access_point: self.fields.get("AP").cloned(),
            sync: self.parse_or_default("sync"),
            sent: self.parse_or_default("sent"),
            total: self.parse_or_default("total"),
            progress: self.parse_or_default("progress"),
            speed_kbps: self.parse_or_default("speed"),
            update_age_secs: self.parse_or_default("updateAge"),
            firmware_pending: self.parse_or_default::<u8>("fwPending") != 0,
            ..Default::default()
        };

        if let Some(line) = self.fields.get("genericMessage") {
            record.push_generic_message(line.clone());
        }
        record
    }

    fn parse_or_default<T: std::str::FromStr + Default>(&self, key: &str) -> T {
        self.fields
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_fields_survive_the_string_roundtrip() {
        let record = SensorRecord {
            firmware_version: 21,
            voltage_mv: 3775,
            current_ma: -85,
            state_of_charge: 64,
            session_count: 3,
            flash_free_bytes: 1_048_576,
            access_point: Some("EvoStation1".to_string()),
            sync: 1,
            sent: 500_000,
            total: 1_000_000,
            progress: 0.5,
            speed_kbps: 48.83,
            update_age_secs: 2.5,
            firmware_pending: true,
            ..Default::default()
        };

        let row = SnapshotRow::from_record("S1", &record);
        assert_eq!(row.fields["fwPending"], "1");

        let back = row.to_record();
        assert_eq!(back.voltage_mv, 3775);
        assert_eq!(back.current_ma, -85);
        assert_eq!(back.sent, 500_000);
        assert!((back.progress - 0.5).abs() < 1e-9);
        assert!((back.speed_kbps - 48.83).abs() < 1e-9);
        assert!(back.firmware_pending);
        assert_eq!(back.access_point.as_deref(), Some("EvoStation1"));
    }

    #[test]
    fn garbage_values_coerce_to_defaults() {
        let mut fields = HashMap::new();
        fields.insert("v".to_string(), "not-a-number".to_string());
        fields.insert("soc".to_string(), "".to_string());
        let row = SnapshotRow {
            id: "S1".to_string(),
            fields,
        };

        let record = row.to_record();
        assert_eq!(record.voltage_mv, 0);
        assert_eq!(record.state_of_charge, 0);
        assert!(!record.firmware_pending);
    }
}
