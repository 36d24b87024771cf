use serde::{Deserialize, Serialize};

/// 进程启动时加载的全量配置，不支持热更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub distributor: DistributorSettings,

    /// 每个站点一个编排器实例
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

/// MQTT broker 连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_broker_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
        }
    }
}

/// 状态聚合端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// 持久化状态文件
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// 每设备审计日志目录
    #[serde(default = "default_sensor_log_dir")]
    pub sensor_log_dir: String,

    /// 快照端点监听地址
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// 待部署固件制品目录
    #[serde(default = "default_firmware_dir")]
    pub firmware_dir: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            sensor_log_dir: default_sensor_log_dir(),
            api_addr: default_api_addr(),
            firmware_dir: default_firmware_dir(),
        }
    }
}

/// 后台定时任务间隔
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,

    #[serde(default = "default_firmware_interval")]
    pub firmware_interval_secs: u64,

    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            liveness_interval_secs: default_liveness_interval(),
            firmware_interval_secs: default_firmware_interval(),
            persist_interval_secs: default_persist_interval(),
        }
    }
}

/// 编排器节拍与停滞阈值
///
/// 停滞阈值沿用长期运行中得到的经验值，按节拍数而非壁钟时间计数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// updateAge 超过该秒数视为离线
    #[serde(default = "default_update_age_threshold")]
    pub update_age_threshold_secs: f64,

    /// Syncing 中进度无变化多少个节拍后开始上报停滞
    #[serde(default = "default_stall_timeout_ticks")]
    pub stall_timeout_ticks: u32,

    /// SyncOrdered 中重复 ready 多少个节拍后复位回 Idle
    #[serde(default = "default_sync_ordered_reset_ticks")]
    pub sync_ordered_reset_ticks: u32,

    /// 连续停滞多少个节拍后判定 Stuck
    #[serde(default = "default_syncing_stall_ticks")]
    pub syncing_stall_ticks: u32,

    /// 快照端点地址
    #[serde(default = "default_snapshot_url")]
    pub snapshot_url: String,
}

impl Default for DistributorSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            update_age_threshold_secs: default_update_age_threshold(),
            stall_timeout_ticks: default_stall_timeout_ticks(),
            sync_ordered_reset_ticks: default_sync_ordered_reset_ticks(),
            syncing_stall_ticks: default_syncing_stall_ticks(),
            snapshot_url: default_snapshot_url(),
        }
    }
}

/// 一个接入点分组及其并行上传上限
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,

    #[serde(default = "default_parallel_uploads")]
    pub parallel_uploads: usize,
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "fleet-listener".to_string()
}

fn default_state_file() -> String {
    "sensor_logs/sensor_states.json".to_string()
}

fn default_sensor_log_dir() -> String {
    "sensor_logs".to_string()
}

fn default_api_addr() -> String {
    "0.0.0.0:50051".to_string()
}

fn default_firmware_dir() -> String {
    "firmware".to_string()
}

fn default_liveness_interval() -> u64 {
    1
}

fn default_firmware_interval() -> u64 {
    5
}

fn default_persist_interval() -> u64 {
    5
}

fn default_tick_interval() -> u64 {
    3
}

fn default_update_age_threshold() -> f64 {
    30.0
}

fn default_stall_timeout_ticks() -> u32 {
    10
}

fn default_sync_ordered_reset_ticks() -> u32 {
    20
}

fn default_syncing_stall_ticks() -> u32 {
    30
}

fn default_snapshot_url() -> String {
    "http://127.0.0.1:50051".to_string()
}

fn default_parallel_uploads() -> usize {
    6
}
