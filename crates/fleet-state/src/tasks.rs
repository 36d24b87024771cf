use crate::firmware::FirmwareInventory;
use crate::store::SensorStateStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

/// 后台定时任务间隔
#[derive(Debug, Clone, Copy)]
pub struct TaskIntervals {
    pub liveness: Duration,
    pub firmware: Duration,
    pub persist: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            liveness: Duration::from_secs(1),
            firmware: Duration::from_secs(5),
            persist: Duration::from_secs(5),
        }
    }
}

/// 后台定时任务
///
/// 三个相互独立的循环；单次迭代失败只记录日志，下一个节拍照常执行。
pub struct PeriodicTasks;

impl PeriodicTasks {
    pub fn spawn(
        store: Arc<SensorStateStore>,
        inventory: Arc<dyn FirmwareInventory>,
        intervals: TaskIntervals,
    ) -> Vec<JoinHandle<()>> {
        info!(?intervals, "Starting periodic tasks");

        let liveness = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut ticker = interval(intervals.liveness);
                loop {
                    ticker.tick().await;
                    store.recompute_update_ages(Utc::now()).await;
                }
            })
        };

        let firmware = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut ticker = interval(intervals.firmware);
                loop {
                    ticker.tick().await;
                    match inventory.pending_updates().await {
                        Ok(pending) => store.set_firmware_pending(&pending).await,
                        Err(e) => {
                            // 本轮跳过，保留上一轮的标记
                            warn!(error = %e, "Firmware inventory query failed");
                        }
                    }
                }
            })
        };

        let persistence = tokio::spawn(async move {
            let mut ticker = interval(intervals.persist);
            loop {
                ticker.tick().await;
                if let Err(e) = store.persist().await {
                    error!(error = %e, "Periodic persistence failed");
                }
            }
        });

        vec![liveness, firmware, persistence]
    }
}
