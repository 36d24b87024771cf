use fleet_types::SensorRecord;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// 消息文件滚动阈值
const MESSAGE_FILE_ROLL_BYTES: u64 = 100 * 1024 * 1024;

const QUEUE_CAPACITY: usize = 1024;

/// 审计 CSV 的列顺序
const CSV_COLUMNS: &str =
    "fw,v,mA,soc,sessions,flashFree,AP,sync,sent,total,progress,speed,lastseen,updateAge,fwPending";

/// 一次落盘操作
#[derive(Debug)]
pub enum WriteJob {
    /// 追加一行结构化更新审计记录
    CsvRow {
        device_id: String,
        record: Box<SensorRecord>,
    },
    /// 追加一行自由文本诊断消息
    GenericLine { device_id: String, line: String },
    /// 整体重写持久化状态文件
    StateFile { path: PathBuf, json: String },
}

/// 审计与持久化文件写入端
///
/// 所有磁盘写入经单个工作任务串行执行；磁盘故障只记录日志，
/// 绝不阻塞也绝不中断内存侧的处理。
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<WriteJob>,
}

impl AuditWriter {
    /// 启动写入工作任务
    pub fn spawn(sensor_log_dir: impl Into<PathBuf>) -> Self {
        let root: PathBuf = sensor_log_dir.into();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(async move {
            Self::process_queue(root, rx).await;
        });

        Self { tx }
    }

    /// 入队一次写入；队列满时丢弃并告警
    pub fn enqueue(&self, job: WriteJob) {
        if let Err(e) = self.tx.try_send(job) {
            warn!(error = %e, "Audit write queue full, dropping entry");
        }
    }

    async fn process_queue(root: PathBuf, mut rx: mpsc::Receiver<WriteJob>) {
        debug!(dir = %root.display(), "Audit writer started");
        while let Some(job) = rx.recv().await {
            if let Err(e) = Self::execute(&root, job).await {
                error!(error = %e, "Audit write failed");
            }
        }
        debug!("Audit writer stopped");
    }

    async fn execute(root: &Path, job: WriteJob) -> std::io::Result<()> {
        match job {
            WriteJob::CsvRow { device_id, record } => {
                Self::append_csv_row(root, &device_id, &record).await
            }
            WriteJob::GenericLine { device_id, line } => {
                Self::append_generic_line(root, &device_id, &line).await
            }
            WriteJob::StateFile { path, json } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&path, json).await
            }
        }
    }

    async fn append_csv_row(
        root: &Path,
        device_id: &str,
        record: &SensorRecord,
    ) -> std::io::Result<()> {
        let dir = root.join(device_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.csv", device_id));

        let fresh = fs::metadata(&path).await.is_err();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if fresh {
            file.write_all(CSV_COLUMNS.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.write_all(csv_row(record).as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn append_generic_line(
        root: &Path,
        device_id: &str,
        line: &str,
    ) -> std::io::Result<()> {
        let dir = root.join(device_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("messages_{}.txt", device_id));

        // 超过阈值滚动到 *_old.txt，覆盖上一个滚动文件
        if let Ok(meta) = fs::metadata(&path).await {
            if meta.len() >= MESSAGE_FILE_ROLL_BYTES {
                let rotated = dir.join(format!("messages_{}_old.txt", device_id));
                fs::rename(&path, &rotated).await?;
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

fn csv_row(record: &SensorRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        record.firmware_version,
        record.voltage_mv,
        record.current_ma,
        record.state_of_charge,
        record.session_count,
        record.flash_free_bytes,
        record.access_point.as_deref().unwrap_or(""),
        record.sync,
        record.sent,
        record.total,
        record.progress,
        record.speed_kbps,
        record
            .last_seen
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        record.update_age_secs,
        record.firmware_pending as u8,
    )
}
