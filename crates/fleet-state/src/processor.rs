use crate::store::SensorStateStore;
use chrono::{DateTime, Utc};
use fleet_types::{topic, InboundMessage, TelemetryPatch};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// 进度变化小于该绝对差时不重算速度
///
/// 新传输开始时 total 可能被重置，进度出现数值回退；
/// 该阈值同时滤掉速度噪声和这种已知的回退近似。
const PROGRESS_DELTA_THRESHOLD: f64 = 0.01;

/// 遥测消息处理器
///
/// 单消费者顺序地消费处理队列：结构化解码成功则合并进状态表并
/// 重算派生指标，失败则降级为带时间戳的诊断文本行。
/// 解码失败从不向上抛出。
pub struct MessageProcessor {
    store: Arc<SensorStateStore>,
    queue: mpsc::Receiver<InboundMessage>,
}

impl MessageProcessor {
    pub fn new(store: Arc<SensorStateStore>, queue: mpsc::Receiver<InboundMessage>) -> Self {
        Self { store, queue }
    }

    /// 消费队列直到发送端全部关闭
    pub async fn run(mut self) {
        info!("Message processor started");
        while let Some(message) = self.queue.recv().await {
            self.handle_message(message).await;
        }
        info!("Ingestion queue closed, message processor stopping");
    }

    async fn handle_message(&self, message: InboundMessage) {
        let device_id = topic::device_id_from_topic(&message.topic).to_string();

        match serde_json::from_slice::<TelemetryPatch>(&message.payload) {
            Ok(patch) => {
                self.store
                    .apply_patch(&device_id, &patch, message.received_at)
                    .await;

                if patch.carries_sync() {
                    self.process_sync(&device_id, &patch, message.received_at)
                        .await;
                }
                debug!(device_id = %device_id, "Telemetry merged");
            }
            Err(_) => {
                self.handle_generic(&device_id, &message).await;
            }
        }
    }

    /// 重算传输进度与速度
    ///
    /// progress = sent/total（total 为 0 时取 0）；速度只在进度绝对差
    /// 超过阈值时按 (Δprogress × total / 秒) 重算为 KB/s，否则沿用上次值；
    /// 任何情况下都钳制为非负。sync 不为 1 时两者归零。
    async fn process_sync(&self, device_id: &str, patch: &TelemetryPatch, now: DateTime<Utc>) {
        let sent = patch.sent.unwrap_or(0);
        let total = patch.total.unwrap_or(0);
        let sync = patch.sync.unwrap_or(0);

        let mut progress = 0.0;
        let mut speed = 0.0;

        if sync == 1 {
            let previous = self.store.get(device_id).await.unwrap_or_default();
            let last_progress = previous.progress;
            let last_time = previous.speed_calc_at.unwrap_or(now);
            speed = previous.speed_kbps;

            progress = if total > 0 {
                sent as f64 / total as f64
            } else {
                0.0
            };

            if (progress - last_progress).abs() > PROGRESS_DELTA_THRESHOLD {
                let elapsed = (now - last_time).num_milliseconds() as f64 / 1000.0;
                if elapsed > 0.0 {
                    speed = (progress - last_progress) * total as f64 / elapsed / 1024.0;
                    speed = (speed * 100.0).round() / 100.0;
                }
            }
        }

        self.store
            .set_transfer_progress(device_id, progress, speed.max(0.0), now)
            .await;
    }

    async fn handle_generic(&self, device_id: &str, message: &InboundMessage) {
        let line = format!(
            "{}: {}",
            message.received_at.format("%Y-%m-%d %H:%M:%S"),
            String::from_utf8_lossy(&message.payload)
        );

        self.store.push_generic_message(device_id, line).await;
        info!(device_id = %device_id, "Logged generic message");
    }
}
