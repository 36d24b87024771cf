use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::SensorRecord;

/// 整个设备状态表在某一时刻的不可变副本
///
/// 消费者只拿到副本，绝不触及存活的状态表。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// 快照生成时间
    pub taken_at: DateTime<Utc>,

    /// 设备标识 -> 状态记录，按标识排序
    pub devices: BTreeMap<String, SensorRecord>,
}

impl FleetSnapshot {
    pub fn new(taken_at: DateTime<Utc>, devices: BTreeMap<String, SensorRecord>) -> Self {
        Self { taken_at, devices }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn get(&self, device_id: &str) -> Option<&SensorRecord> {
        self.devices.get(device_id)
    }

    /// 过滤出属于某个接入点分组的设备
    pub fn for_station<'a>(
        &'a self,
        station: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a SensorRecord)> {
        self.devices
            .iter()
            .filter(move |(_, record)| record.access_point.as_deref() == Some(station))
    }
}
