use crate::machine::{StallThresholds, SyncEvent, SyncState, SyncStateMachine};
use fleet_mqtt::CommandSink;
use fleet_state_api::SnapshotSource;
use fleet_types::{FleetSnapshot, SensorCommand, SensorRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// 单个站点编排器的运行参数
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// 本实例负责的接入点分组
    pub station_name: String,

    /// 组内并行上传上限
    pub parallel_uploads: usize,

    /// updateAge 超过该秒数视为离线
    pub update_age_threshold_secs: f64,

    /// 进度无变化多少个节拍后开始上报停滞
    pub stall_timeout_ticks: u32,

    /// 状态机停滞阈值
    pub thresholds: StallThresholds,

    /// 编排节拍
    pub tick_interval: Duration,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            station_name: String::new(),
            parallel_uploads: 6,
            update_age_threshold_secs: 30.0,
            stall_timeout_ticks: 10,
            thresholds: StallThresholds::default(),
            tick_interval: Duration::from_secs(3),
        }
    }
}

/// 进度停滞的跟踪标记
struct ProgressMark {
    progress: f64,
    stalled_ticks: u32,
}

/// 站点编排器
///
/// 按固定节拍拉取快照，驱动组内每个设备的状态机，
/// 并以并行上传上限做准入控制。
pub struct Distributor {
    config: DistributorConfig,
    source: Arc<dyn SnapshotSource>,
    commander: Arc<dyn CommandSink>,
    machines: HashMap<String, SyncStateMachine>,
    progress_marks: HashMap<String, ProgressMark>,
    tick_no: u64,
}

impl Distributor {
    pub fn new(
        config: DistributorConfig,
        source: Arc<dyn SnapshotSource>,
        commander: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            config,
            source,
            commander,
            machines: HashMap::new(),
            progress_marks: HashMap::new(),
            tick_no: 0,
        }
    }

    /// 某设备当前的同步状态
    pub fn device_state(&self, device_id: &str) -> Option<SyncState> {
        self.machines.get(device_id).map(|m| m.state())
    }

    /// 编排循环；快照拉取失败只影响本节拍
    pub async fn run(mut self) {
        info!(
            station = %self.config.station_name,
            parallel_uploads = self.config.parallel_uploads,
            "Distributor started"
        );

        let mut ticker = interval(self.config.tick_interval);
        loop {
            ticker.tick().await;
            match self.source.fetch().await {
                Ok(snapshot) => self.tick(&snapshot).await,
                Err(e) => {
                    error!(station = %self.config.station_name, error = %e, "Snapshot fetch failed");
                }
            }
        }
    }

    /// 处理一个编排节拍
    pub async fn tick(&mut self, snapshot: &FleetSnapshot) {
        self.tick_no += 1;

        let group: Vec<(String, SensorRecord)> = snapshot
            .for_station(&self.config.station_name)
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();

        for (device_id, record) in &group {
            if let Err(e) = self.process_device(device_id, record).await {
                // 单个设备的故障不阻断组内其余设备，本节拍状态不变
                warn!(device_id = %device_id, error = %e, "Device processing failed");
            }
        }

        self.distribute_sync().await;
    }

    /// 驱动单个设备的状态机
    async fn process_device(&mut self, device_id: &str, record: &SensorRecord) -> anyhow::Result<()> {
        let tick = self.tick_no;
        let thresholds = self.config.thresholds;
        let machine = self
            .machines
            .entry(device_id.to_string())
            .or_insert_with(|| SyncStateMachine::new(device_id, thresholds));

        // 存活性优先于其它一切事件
        if record.update_age_secs > self.config.update_age_threshold_secs {
            machine.transition(SyncEvent::Offline, tick);
        } else {
            machine.transition(SyncEvent::Online, tick);
        }

        // 停滞检测只在上传中进行；进度任何变化都复位计数，
        // 包括滚动到下一个文件后从零重来的回退
        if machine.state() == SyncState::Syncing {
            let mark = self
                .progress_marks
                .entry(device_id.to_string())
                .or_insert(ProgressMark {
                    progress: record.progress,
                    stalled_ticks: 0,
                });
            if record.progress != mark.progress {
                mark.progress = record.progress;
                mark.stalled_ticks = 0;
            } else if mark.stalled_ticks >= self.config.stall_timeout_ticks {
                machine.transition(SyncEvent::Stuck, tick);
            } else {
                mark.stalled_ticks += 1;
            }
        }

        // 卡死的传输：下发一次重启并立即视为离线
        if machine.state() == SyncState::Stuck {
            warn!(device_id = %device_id, "Sensor stuck on upload, will reboot");
            self.commander.send(device_id, SensorCommand::Reboot).await?;
            machine.transition(SyncEvent::Reboot, tick);
        }

        if record.sync == 1 {
            machine.transition(SyncEvent::SyncStarted, tick);
        } else if record.sync == 0 && !record.firmware_pending && record.session_count == 0 {
            machine.transition(SyncEvent::SyncCompleted, tick);
        } else if record.sync == 0 && (record.session_count > 0 || record.firmware_pending) {
            machine.transition(SyncEvent::UpdateReady, tick);
        }

        Ok(())
    }

    /// 准入控制与无线电静默
    async fn distribute_sync(&mut self) {
        let tick = self.tick_no;

        let mut active = self
            .machines
            .values()
            .filter(|m| matches!(m.state(), SyncState::Syncing | SyncState::SyncOrdered))
            .count();

        // 最早就绪优先，节拍号相同时按设备标识保证确定性
        let mut ready: Vec<(String, u64)> = self
            .machines
            .values()
            .filter(|m| m.state() == SyncState::ReadyToSync)
            .map(|m| (m.device_id().to_string(), m.ready_since().unwrap_or(u64::MAX)))
            .collect();
        ready.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let idle: Vec<String> = self
            .machines
            .values()
            .filter(|m| m.state() == SyncState::Idle)
            .map(|m| m.device_id().to_string())
            .collect();

        let any_ready_or_active = !ready.is_empty() || active > 0;

        for (device_id, _) in ready {
            if active < self.config.parallel_uploads {
                match self.commander.send(&device_id, SensorCommand::Sync).await {
                    Ok(()) => {
                        if let Some(machine) = self.machines.get_mut(&device_id) {
                            machine.transition(SyncEvent::SyncCommandIssued, tick);
                        }
                        active += 1;
                    }
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "Failed to order sync");
                    }
                }
            } else if let Err(e) = self
                .commander
                .send(&device_id, SensorCommand::WifiSleep)
                .await
            {
                warn!(device_id = %device_id, error = %e, "Failed to order radio sleep");
            }
        }

        // 有人在传或在排队时让空闲设备静默，降低信道竞争与功耗
        if any_ready_or_active {
            for device_id in idle {
                if let Err(e) = self
                    .commander
                    .send(&device_id, SensorCommand::WifiSleep)
                    .await
                {
                    warn!(device_id = %device_id, error = %e, "Failed to order radio sleep");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use fleet_mqtt::ChannelCommandSink;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    const STATION: &str = "EvoStation1";

    struct NullSource;

    #[async_trait]
    impl SnapshotSource for NullSource {
        async fn fetch(&self) -> anyhow::Result<FleetSnapshot> {
            Ok(FleetSnapshot::new(Utc::now(), BTreeMap::new()))
        }
    }

    /// 对指定设备的 sync 指令报错，其余照常回显
    struct FailingSink {
        fail_for: String,
        inner: ChannelCommandSink,
    }

    #[async_trait]
    impl CommandSink for FailingSink {
        async fn send(&self, device_id: &str, command: SensorCommand) -> anyhow::Result<()> {
            if device_id == self.fail_for && command == SensorCommand::Sync {
                anyhow::bail!("broker unreachable");
            }
            self.inner.send(device_id, command).await
        }
    }

    fn config(parallel_uploads: usize) -> DistributorConfig {
        DistributorConfig {
            station_name: STATION.to_string(),
            parallel_uploads,
            update_age_threshold_secs: 30.0,
            stall_timeout_ticks: 1,
            thresholds: StallThresholds {
                sync_ordered_reset_ticks: 20,
                syncing_stall_ticks: 1,
            },
            tick_interval: Duration::from_secs(3),
        }
    }

    fn distributor(
        parallel_uploads: usize,
    ) -> (Distributor, mpsc::UnboundedReceiver<(String, SensorCommand)>) {
        let (sink, rx) = ChannelCommandSink::new();
        (
            Distributor::new(config(parallel_uploads), Arc::new(NullSource), Arc::new(sink)),
            rx,
        )
    }

    fn record(update_age: f64, sync: u8, sessions: u32, progress: f64) -> SensorRecord {
        SensorRecord {
            access_point: Some(STATION.to_string()),
            update_age_secs: update_age,
            sync,
            session_count: sessions,
            progress,
            ..Default::default()
        }
    }

    fn snapshot(entries: &[(&str, SensorRecord)]) -> FleetSnapshot {
        let devices = entries
            .iter()
            .map(|(id, r)| (id.to_string(), r.clone()))
            .collect();
        FleetSnapshot::new(Utc::now(), devices)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<(String, SensorCommand)>) -> Vec<(String, SensorCommand)> {
        let mut commands = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            commands.push(cmd);
        }
        commands
    }

    fn count(commands: &[(String, SensorCommand)], id: &str, command: SensorCommand) -> usize {
        commands
            .iter()
            .filter(|(d, c)| d == id && *c == command)
            .count()
    }

    #[tokio::test]
    async fn ready_device_beyond_limit_sleeps_instead_of_syncing() {
        let (mut d, mut rx) = distributor(1);

        // S2 已在上传占满唯一名额，S1 有两个待传会话
        let snap = snapshot(&[
            ("S1", record(1.0, 0, 2, 0.0)),
            ("S2", record(1.0, 1, 0, 0.2)),
        ]);
        d.tick(&snap).await;

        assert_eq!(d.device_state("S1"), Some(SyncState::ReadyToSync));
        assert_eq!(d.device_state("S2"), Some(SyncState::Syncing));

        let commands = drain(&mut rx);
        assert_eq!(count(&commands, "S1", SensorCommand::Sync), 0);
        assert_eq!(count(&commands, "S1", SensorCommand::WifiSleep), 1);
    }

    #[tokio::test]
    async fn admission_bound_never_exceeded() {
        let (mut d, mut rx) = distributor(2);

        let all_ready = snapshot(&[
            ("A", record(1.0, 0, 1, 0.0)),
            ("B", record(1.0, 0, 1, 0.0)),
            ("C", record(1.0, 0, 1, 0.0)),
            ("D", record(1.0, 0, 1, 0.0)),
            ("E", record(1.0, 0, 1, 0.0)),
        ]);
        d.tick(&all_ready).await;

        let commands = drain(&mut rx);
        let synced: Vec<_> = commands
            .iter()
            .filter(|(_, c)| *c == SensorCommand::Sync)
            .map(|(id, _)| id.clone())
            .collect();
        assert_eq!(synced, vec!["A", "B"]);
        assert_eq!(count(&commands, "C", SensorCommand::WifiSleep), 1);

        // 被下令的设备真正开始传输后仍然不超限
        let two_syncing = snapshot(&[
            ("A", record(1.0, 1, 1, 0.1)),
            ("B", record(1.0, 1, 1, 0.2)),
            ("C", record(1.0, 0, 1, 0.0)),
            ("D", record(1.0, 0, 1, 0.0)),
            ("E", record(1.0, 0, 1, 0.0)),
        ]);
        d.tick(&two_syncing).await;

        let in_flight = ["A", "B", "C", "D", "E"]
            .iter()
            .filter(|id| {
                matches!(
                    d.device_state(id),
                    Some(SyncState::Syncing | SyncState::SyncOrdered)
                )
            })
            .count();
        assert!(in_flight <= 2);
        assert_eq!(count(&drain(&mut rx), "C", SensorCommand::Sync), 0);

        // A 完成后空出的名额给最早就绪的 C
        let one_done = snapshot(&[
            ("A", record(1.0, 0, 0, 0.0)),
            ("B", record(1.0, 1, 1, 0.4)),
            ("C", record(1.0, 0, 1, 0.0)),
            ("D", record(1.0, 0, 1, 0.0)),
            ("E", record(1.0, 0, 1, 0.0)),
        ]);
        d.tick(&one_done).await;

        assert_eq!(d.device_state("A"), Some(SyncState::Idle));
        assert_eq!(d.device_state("C"), Some(SyncState::SyncOrdered));
        assert_eq!(d.device_state("D"), Some(SyncState::ReadyToSync));
    }

    #[tokio::test]
    async fn oldest_ready_device_is_ordered_first() {
        let (mut d, mut rx) = distributor(1);

        // X 占满名额，D 先就绪
        d.tick(&snapshot(&[
            ("X", record(1.0, 1, 0, 0.1)),
            ("D", record(1.0, 0, 1, 0.0)),
            ("C", record(1.0, 0, 0, 0.0)),
        ]))
        .await;
        // 下一拍 C 也就绪
        d.tick(&snapshot(&[
            ("X", record(1.0, 1, 0, 0.2)),
            ("D", record(1.0, 0, 1, 0.0)),
            ("C", record(1.0, 0, 1, 0.0)),
        ]))
        .await;
        drain(&mut rx);

        // X 完成，名额空出
        d.tick(&snapshot(&[
            ("X", record(1.0, 0, 0, 0.0)),
            ("D", record(1.0, 0, 1, 0.0)),
            ("C", record(1.0, 0, 1, 0.0)),
        ]))
        .await;

        assert_eq!(d.device_state("D"), Some(SyncState::SyncOrdered));
        assert_eq!(d.device_state("C"), Some(SyncState::ReadyToSync));
        let commands = drain(&mut rx);
        assert_eq!(count(&commands, "D", SensorCommand::Sync), 1);
        assert_eq!(count(&commands, "C", SensorCommand::Sync), 0);
    }

    #[tokio::test]
    async fn stalled_upload_reboots_exactly_once_then_goes_offline() {
        let (mut d, mut rx) = distributor(6);

        // 进度恒定不动的上传：阈值设为 1，几拍内就应判定卡死
        let frozen = snapshot(&[("S1", record(1.0, 1, 0, 0.5))]);
        for _ in 0..5 {
            d.tick(&frozen).await;
        }

        assert_eq!(d.device_state("S1"), Some(SyncState::Offline));
        let commands = drain(&mut rx);
        assert_eq!(count(&commands, "S1", SensorCommand::Reboot), 1);

        // 设备重启期间沉默，不再有第二次重启
        d.tick(&snapshot(&[("S1", record(100.0, 0, 0, 0.0))])).await;
        assert_eq!(count(&drain(&mut rx), "S1", SensorCommand::Reboot), 0);
    }

    #[tokio::test]
    async fn progress_change_resets_stall_tracking() {
        let (mut d, mut rx) = distributor(6);

        d.tick(&snapshot(&[("S1", record(1.0, 1, 0, 0.5))])).await;
        d.tick(&snapshot(&[("S1", record(1.0, 1, 0, 0.5))])).await;
        // 进度回退也算变化：新文件从零重传
        d.tick(&snapshot(&[("S1", record(1.0, 1, 0, 0.1))])).await;
        d.tick(&snapshot(&[("S1", record(1.0, 1, 0, 0.2))])).await;
        d.tick(&snapshot(&[("S1", record(1.0, 1, 0, 0.3))])).await;

        assert_eq!(d.device_state("S1"), Some(SyncState::Syncing));
        assert_eq!(count(&drain(&mut rx), "S1", SensorCommand::Reboot), 0);
    }

    #[tokio::test]
    async fn liveness_takes_precedence() {
        let (mut d, _rx) = distributor(6);

        d.tick(&snapshot(&[("S1", record(1.0, 1, 0, 0.3))])).await;
        assert_eq!(d.device_state("S1"), Some(SyncState::Syncing));

        // 仍然上报 sync=1，但消息已经太旧
        d.tick(&snapshot(&[("S1", record(100.0, 1, 0, 0.3))])).await;
        assert_eq!(d.device_state("S1"), Some(SyncState::Offline));
    }

    #[tokio::test]
    async fn command_failure_leaves_device_unchanged() {
        let (inner, mut rx) = ChannelCommandSink::new();
        let sink = FailingSink {
            fail_for: "BAD".to_string(),
            inner,
        };
        let mut d = Distributor::new(config(2), Arc::new(NullSource), Arc::new(sink));

        d.tick(&snapshot(&[
            ("BAD", record(1.0, 0, 1, 0.0)),
            ("GOOD", record(1.0, 0, 1, 0.0)),
        ]))
        .await;

        assert_eq!(d.device_state("BAD"), Some(SyncState::ReadyToSync));
        assert_eq!(d.device_state("GOOD"), Some(SyncState::SyncOrdered));
        assert_eq!(count(&drain(&mut rx), "GOOD", SensorCommand::Sync), 1);
    }

    #[tokio::test]
    async fn devices_of_other_stations_are_ignored() {
        let (mut d, mut rx) = distributor(6);

        let foreign = SensorRecord {
            access_point: Some("EvoStation2".to_string()),
            update_age_secs: 1.0,
            session_count: 3,
            ..Default::default()
        };
        let devices = [("S9", foreign)];
        d.tick(&snapshot(&devices)).await;

        assert_eq!(d.device_state("S9"), None);
        assert!(drain(&mut rx).is_empty());
    }
}
