use clap::Parser;
use fleet_config::{ConfigLoader, FleetConfig};
use fleet_distributor::{Distributor, DistributorConfig, StallThresholds};
use fleet_mqtt::{FrameComposer, MqttCommander, TelemetrySubscriber};
use fleet_state::{
    AuditWriter, DirectoryInventory, MessageProcessor, PeriodicTasks, SensorStateStore,
    TaskIntervals,
};
use fleet_state_api::{AppState, SnapshotClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const INGEST_QUEUE_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/fleet.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(config = %args.config, "Starting fleet server");

    // 配置错误是唯一允许致命的故障类别
    let config = ConfigLoader::new(&args.config).load()?;
    ConfigLoader::validate(&config)?;

    run(config).await
}

async fn run(config: FleetConfig) -> anyhow::Result<()> {
    let credentials = config
        .broker
        .username
        .clone()
        .zip(config.broker.password.clone());

    // 状态存储与审计落盘
    let audit = AuditWriter::spawn(&config.listener.sensor_log_dir);
    let store = Arc::new(SensorStateStore::open(&config.listener.state_file, audit));

    // 遥测入站：订阅端 -> 处理队列 -> 消息处理器
    let (ingest_tx, ingest_rx) = tokio::sync::mpsc::channel(INGEST_QUEUE_CAPACITY);
    let _subscriber = TelemetrySubscriber::connect(
        &config.broker.host,
        config.broker.port,
        &config.broker.client_id,
        credentials.clone(),
        vec!["#".to_string()],
        ingest_tx,
    );
    tokio::spawn(MessageProcessor::new(store.clone(), ingest_rx).run());

    // 后台定时任务
    let inventory = Arc::new(DirectoryInventory::new(&config.listener.firmware_dir));
    let intervals = TaskIntervals {
        liveness: Duration::from_secs(config.scheduler.liveness_interval_secs),
        firmware: Duration::from_secs(config.scheduler.firmware_interval_secs),
        persist: Duration::from_secs(config.scheduler.persist_interval_secs),
    };
    PeriodicTasks::spawn(store.clone(), inventory, intervals);

    // 快照端点
    let api_addr: SocketAddr = config.listener.api_addr.parse()?;
    let app_state = AppState::new(store.clone());
    tokio::spawn(async move {
        if let Err(e) = fleet_state_api::serve(api_addr, app_state).await {
            error!(error = %e, "Snapshot endpoint terminated");
        }
    });

    // 每个站点一个编排器；编排器即使同进程也只通过快照端点读状态
    if !config.stations.is_empty() {
        let commander = Arc::new(MqttCommander::connect(
            &config.broker.host,
            config.broker.port,
            &format!("{}-commander", config.broker.client_id),
            credentials,
            Arc::new(FrameComposer::new()),
        ));

        for station in &config.stations {
            info!(
                station = %station.name,
                parallel_uploads = station.parallel_uploads,
                "Creating distributor instance"
            );

            let distributor_config = DistributorConfig {
                station_name: station.name.clone(),
                parallel_uploads: station.parallel_uploads,
                update_age_threshold_secs: config.distributor.update_age_threshold_secs,
                stall_timeout_ticks: config.distributor.stall_timeout_ticks,
                thresholds: StallThresholds {
                    sync_ordered_reset_ticks: config.distributor.sync_ordered_reset_ticks,
                    syncing_stall_ticks: config.distributor.syncing_stall_ticks,
                },
                tick_interval: Duration::from_secs(config.distributor.tick_interval_secs),
            };
            let source = Arc::new(SnapshotClient::new(config.distributor.snapshot_url.clone()));
            tokio::spawn(Distributor::new(distributor_config, source, commander.clone()).run());
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, persisting state");
    if let Err(e) = store.persist().await {
        error!(error = %e, "Final persistence failed");
    }
    // 给写入队列一点时间落盘
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
