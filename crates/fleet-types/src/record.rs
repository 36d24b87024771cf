use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::telemetry::TelemetryPatch;

/// 通用诊断消息环形缓冲容量（最新在前）
pub const GENERIC_MESSAGE_CAPACITY: usize = 8;

/// 单个传感器设备的最新已知状态
///
/// 以设备标识（硬件派生的稳定名称）为键，由状态存储持有。
/// 记录一旦创建就不会被删除，设备失联通过 `update_age_secs` 表达。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorRecord {
    /// 固件版本
    #[serde(rename = "fw", default)]
    pub firmware_version: u32,

    /// 电池电压（毫伏）
    #[serde(rename = "v", default)]
    pub voltage_mv: i64,

    /// 电流（毫安）
    #[serde(rename = "mA", default)]
    pub current_ma: i64,

    /// 电池剩余电量（百分比）
    #[serde(rename = "soc", default)]
    pub state_of_charge: i64,

    /// 待上传的记录会话数
    #[serde(rename = "sessions", default)]
    pub session_count: u32,

    /// 闪存剩余空间（字节）
    #[serde(rename = "flashFree", default)]
    pub flash_free_bytes: u64,

    /// 设备当前上报的接入点/站点（准入控制的分组边界）
    #[serde(rename = "AP", default)]
    pub access_point: Option<String>,

    /// 上传进行中标志（设备上报，0/1）
    #[serde(default)]
    pub sync: u8,

    /// 当前传输已发送字节数
    #[serde(default)]
    pub sent: u64,

    /// 当前传输总字节数
    #[serde(default)]
    pub total: u64,

    /// 派生字段：传输进度 0.0–1.0
    #[serde(default)]
    pub progress: f64,

    /// 派生字段：传输速度（KB/s）
    #[serde(rename = "speed", default)]
    pub speed_kbps: f64,

    /// 最近一次收到消息的时间
    #[serde(rename = "lastseen", default)]
    pub last_seen: Option<DateTime<Utc>>,

    /// 距最近一次消息的秒数，由后台任务周期性重算
    #[serde(rename = "updateAge", default)]
    pub update_age_secs: f64,

    /// 是否有待部署的固件
    #[serde(rename = "fwPending", default)]
    pub firmware_pending: bool,

    /// 最近的自由文本诊断行（最新在前，有界）
    #[serde(rename = "genericMessages", default)]
    pub generic_messages: VecDeque<String>,

    /// 上次速度计算的时间点
    #[serde(rename = "speedCalcTime", default)]
    pub speed_calc_at: Option<DateTime<Utc>>,
}

impl Default for SensorRecord {
    fn default() -> Self {
        Self {
            firmware_version: 0,
            voltage_mv: 0,
            current_ma: 0,
            state_of_charge: 0,
            session_count: 0,
            flash_free_bytes: 0,
            access_point: None,
            sync: 0,
            sent: 0,
            total: 0,
            progress: 0.0,
            speed_kbps: 0.0,
            last_seen: None,
            update_age_secs: 0.0,
            firmware_pending: false,
            generic_messages: VecDeque::new(),
            speed_calc_at: None,
        }
    }
}

impl SensorRecord {
    /// 合并一条遥测补丁，只覆盖补丁中实际出现的字段
    pub fn apply_patch(&mut self, patch: &TelemetryPatch) {
        if let Some(fw) = patch.firmware_version {
            self.firmware_version = fw;
        }
        if let Some(v) = patch.voltage_mv {
            self.voltage_mv = v;
        }
        if let Some(ma) = patch.current_ma {
            self.current_ma = ma;
        }
        if let Some(soc) = patch.state_of_charge {
            self.state_of_charge = soc;
        }
        if let Some(sessions) = patch.session_count {
            self.session_count = sessions;
        }
        if let Some(free) = patch.flash_free_bytes {
            self.flash_free_bytes = free;
        }
        if let Some(ap) = &patch.access_point {
            self.access_point = Some(ap.clone());
        }
        if let Some(sync) = patch.sync {
            self.sync = sync;
        }
        if let Some(sent) = patch.sent {
            self.sent = sent;
        }
        if let Some(total) = patch.total {
            self.total = total;
        }
    }

    /// 前插一条诊断消息，超出容量的最旧条目被丢弃
    pub fn push_generic_message(&mut self, line: String) {
        self.generic_messages.push_front(line);
        self.generic_messages.truncate(GENERIC_MESSAGE_CAPACITY);
    }
}
