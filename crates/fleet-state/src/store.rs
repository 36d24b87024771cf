use crate::audit::{AuditWriter, WriteJob};
use crate::error::Result;
use chrono::{DateTime, Utc};
use fleet_types::{FleetSnapshot, SensorRecord, TelemetryPatch};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 设备状态表的权威持有者
///
/// 所有修改走写锁，快照在读锁下深拷贝整表；
/// 任何调用者都拿不到存活表的引用，也观察不到半套用的更新。
pub struct SensorStateStore {
    state_path: PathBuf,
    audit: AuditWriter,
    table: RwLock<HashMap<String, SensorRecord>>,
}

impl SensorStateStore {
    /// 打开状态存储，尝试从持久化文件恢复
    ///
    /// 文件缺失从空表启动；文件损坏记录告警后同样从空表启动，绝不致命。
    pub fn open(state_path: impl Into<PathBuf>, audit: AuditWriter) -> Self {
        let state_path = state_path.into();
        let table = Self::restore(&state_path);

        Self {
            state_path,
            audit,
            table: RwLock::new(table),
        }
    }

    fn restore(path: &Path) -> HashMap<String, SensorRecord> {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, SensorRecord>>(&content) {
                Ok(table) => {
                    info!(path = %path.display(), devices = table.len(), "Restored state file");
                    table
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt state file, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No state file, starting empty");
                HashMap::new()
            }
        }
    }

    /// 合并一条遥测补丁并刷新 lastseen，按需创建记录
    pub async fn apply_patch(
        &self,
        device_id: &str,
        patch: &TelemetryPatch,
        at: DateTime<Utc>,
    ) {
        let mut table = self.table.write().await;
        let record = table.entry(device_id.to_string()).or_default();
        record.apply_patch(patch);
        record.last_seen = Some(at);

        let record = record.clone();
        drop(table);

        self.audit.enqueue(WriteJob::CsvRow {
            device_id: device_id.to_string(),
            record: Box::new(record),
        });
    }

    /// 写入派生的进度/速度字段
    pub async fn set_transfer_progress(
        &self,
        device_id: &str,
        progress: f64,
        speed_kbps: f64,
        at: DateTime<Utc>,
    ) {
        let mut table = self.table.write().await;
        let record = table.entry(device_id.to_string()).or_default();
        record.progress = progress;
        record.speed_kbps = speed_kbps;
        record.speed_calc_at = Some(at);
        record.last_seen = Some(at);

        let record = record.clone();
        drop(table);

        self.audit.enqueue(WriteJob::CsvRow {
            device_id: device_id.to_string(),
            record: Box::new(record),
        });
    }

    /// 记录一条无法结构化解码的诊断消息
    pub async fn push_generic_message(&self, device_id: &str, line: String) {
        let mut table = self.table.write().await;
        let record = table.entry(device_id.to_string()).or_default();
        record.push_generic_message(line.clone());
        drop(table);

        self.audit.enqueue(WriteJob::GenericLine {
            device_id: device_id.to_string(),
            line,
        });
    }

    /// 读取单个设备记录的副本
    pub async fn get(&self, device_id: &str) -> Option<SensorRecord> {
        self.table.read().await.get(device_id).cloned()
    }

    /// 按固件清单为所有已知设备打 fwPending 标记；不在清单中的设备置 false
    pub async fn set_firmware_pending(&self, pending: &HashSet<String>) {
        let mut table = self.table.write().await;
        for (device_id, record) in table.iter_mut() {
            record.firmware_pending = pending.contains(device_id);
        }
    }

    /// 重算所有设备的消息时效
    pub async fn recompute_update_ages(&self, now: DateTime<Utc>) {
        let mut table = self.table.write().await;
        for record in table.values_mut() {
            if let Some(last_seen) = record.last_seen {
                let age = (now - last_seen).num_milliseconds() as f64 / 1000.0;
                record.update_age_secs = (age * 10.0).round() / 10.0;
            }
        }
    }

    /// 生成整表的一致性副本
    pub async fn snapshot(&self) -> FleetSnapshot {
        let table = self.table.read().await;
        let devices: BTreeMap<String, SensorRecord> =
            table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        FleetSnapshot::new(Utc::now(), devices)
    }

    /// 当前已知的设备标识
    pub async fn device_ids(&self) -> Vec<String> {
        self.table.read().await.keys().cloned().collect()
    }

    /// 把整表序列化后交给写入队列整体重写持久化文件
    pub async fn persist(&self) -> Result<()> {
        let json = {
            let table = self.table.read().await;
            serde_json::to_string(&*table)?
        };

        self.audit.enqueue(WriteJob::StateFile {
            path: self.state_path.clone(),
            json,
        });
        Ok(())
    }
}
