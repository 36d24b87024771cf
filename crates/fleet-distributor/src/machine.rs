use std::fmt;
use tracing::{error, info};

/// 设备同步生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Offline,
    Idle,
    ReadyToSync,
    SyncOrdered,
    Syncing,
    Stuck,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Offline => "OFFLINE",
            SyncState::Idle => "IDLE",
            SyncState::ReadyToSync => "READY_TO_SYNC",
            SyncState::SyncOrdered => "SYNC_ORDERED",
            SyncState::Syncing => "SYNCING",
            SyncState::Stuck => "STUCK",
        };
        f.write_str(name)
    }
}

/// 驱动状态迁移的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// updateAge 回到阈值以内
    Online,
    /// updateAge 超过阈值
    Offline,
    /// 有待上传会话或待部署固件且当前未上传
    UpdateReady,
    /// 编排器已下发 sync 指令
    SyncCommandIssued,
    /// 观察到设备 sync=1
    SyncStarted,
    /// sync=0 且无会话、无待部署固件
    SyncCompleted,
    /// 上传失败
    SyncFailed,
    /// 上传进度停滞
    Stuck,
    /// 已下发重启指令
    Reboot,
}

/// 停滞阈值（节拍数）
///
/// 数值沿用长期运行中的经验值，无解析推导，保持可配置。
#[derive(Debug, Clone, Copy)]
pub struct StallThresholds {
    /// SyncOrdered 中重复 ready 超过该节拍数后复位回 Idle
    pub sync_ordered_reset_ticks: u32,
    /// 连续停滞超过该节拍数后判定 Stuck
    pub syncing_stall_ticks: u32,
}

impl Default for StallThresholds {
    fn default() -> Self {
        Self {
            sync_ordered_reset_ticks: 20,
            syncing_stall_ticks: 30,
        }
    }
}

/// 单个设备的同步状态机
///
/// 只存在于编排器进程内存中，首次在快照里见到设备时惰性创建。
pub struct SyncStateMachine {
    device_id: String,
    state: SyncState,
    thresholds: StallThresholds,
    stuck_in_sync_ordered: u32,
    stuck_in_syncing: u32,
    ready_since_tick: Option<u64>,
}

impl SyncStateMachine {
    pub fn new(device_id: impl Into<String>, thresholds: StallThresholds) -> Self {
        Self {
            device_id: device_id.into(),
            state: SyncState::Offline,
            thresholds,
            stuck_in_sync_ordered: 0,
            stuck_in_syncing: 0,
            ready_since_tick: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// 进入 ReadyToSync 的节拍号，用于最早就绪优先排序
    pub fn ready_since(&self) -> Option<u64> {
        self.ready_since_tick
    }

    /// 处理一个事件，必要时迁移状态
    ///
    /// 未在当前状态下定义的事件被忽略。
    pub fn transition(&mut self, event: SyncEvent, tick: u64) {
        let previous = self.state;

        match (self.state, event) {
            (SyncState::Idle, SyncEvent::UpdateReady) => self.enter_ready(tick),
            (SyncState::Idle, SyncEvent::Offline) => self.state = SyncState::Offline,
            // 设备也可能不等指令自行开始上传
            (SyncState::Idle, SyncEvent::SyncStarted) => self.state = SyncState::Syncing,

            (SyncState::ReadyToSync, SyncEvent::SyncCommandIssued) => {
                self.state = SyncState::SyncOrdered;
            }
            (SyncState::ReadyToSync, SyncEvent::Offline) => self.state = SyncState::Offline,

            (SyncState::SyncOrdered, SyncEvent::SyncStarted) => self.state = SyncState::Syncing,
            (SyncState::SyncOrdered, SyncEvent::SyncCompleted) => self.state = SyncState::Idle,
            (SyncState::SyncOrdered, SyncEvent::Offline) => self.state = SyncState::Offline,
            (SyncState::SyncOrdered, SyncEvent::UpdateReady) => {
                // 指令下发后设备迟迟不开始：计数复位回 Idle，之后重新排队
                if self.stuck_in_sync_ordered > self.thresholds.sync_ordered_reset_ticks {
                    error!(device_id = %self.device_id, "Sensor stuck in SyncOrdered, resetting");
                    self.state = SyncState::Idle;
                    self.stuck_in_sync_ordered = 0;
                } else {
                    self.stuck_in_sync_ordered += 1;
                }
            }

            (SyncState::Syncing, SyncEvent::SyncCompleted) => self.state = SyncState::Idle,
            (SyncState::Syncing, SyncEvent::SyncFailed) => self.enter_ready(tick),
            (SyncState::Syncing, SyncEvent::Offline) => self.state = SyncState::Offline,
            (SyncState::Syncing, SyncEvent::Stuck) => {
                if self.stuck_in_syncing > self.thresholds.syncing_stall_ticks {
                    self.state = SyncState::Stuck;
                    self.stuck_in_syncing = 0;
                } else {
                    self.stuck_in_syncing += 1;
                }
            }

            (SyncState::Stuck, SyncEvent::Reboot) => self.state = SyncState::Offline,
            (SyncState::Stuck, SyncEvent::Offline) => self.state = SyncState::Offline,

            (SyncState::Offline, SyncEvent::Online) => self.state = SyncState::Idle,

            _ => {}
        }

        if self.state != previous {
            info!(
                device_id = %self.device_id,
                from = %previous,
                to = %self.state,
                "State transition"
            );
        }
    }

    fn enter_ready(&mut self, tick: u64) {
        self.state = SyncState::ReadyToSync;
        self.ready_since_tick = Some(tick);
    }
}
