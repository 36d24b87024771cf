use crate::composer::CommandComposer;
use fleet_types::{topic, SensorCommand};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// 指令发布端
///
/// 每条指令点对点地址到单个设备，净荷是合成器产出的完整帧。
pub struct MqttCommander {
    client: AsyncClient,
    composer: Arc<dyn CommandComposer>,
}

impl MqttCommander {
    /// 建立发布会话
    pub fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        credentials: Option<(String, String)>,
        composer: Arc<dyn CommandComposer>,
    ) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let Some((username, password)) = credentials {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 16);

        tokio::spawn(async move {
            Self::drive_connection(eventloop).await;
        });

        info!(broker = %format!("{}:{}", host, port), client_id = %client_id, "Command channel started");

        Self { client, composer }
    }

    async fn drive_connection(mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    debug!(?event, "Command channel event");
                }
                Err(e) => {
                    error!(error = %e, "Command channel connection error, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// 向单个设备下发指令
    pub async fn send_command(&self, device_id: &str, command: SensorCommand) -> anyhow::Result<()> {
        let topic = topic::command_topic(device_id);
        let payload = self.composer.compose(command);

        self.client
            .publish(topic.clone(), QoS::ExactlyOnce, false, payload)
            .await?;

        info!(device_id = %device_id, command = %command, topic = %topic, "Command sent");
        Ok(())
    }
}

/// 编排器看到的指令下发接口
#[async_trait::async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, device_id: &str, command: SensorCommand) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl CommandSink for MqttCommander {
    async fn send(&self, device_id: &str, command: SensorCommand) -> anyhow::Result<()> {
        self.send_command(device_id, command).await
    }
}

/// 把下发的指令同时回送到进程内通道，供测试与诊断观察
pub struct ChannelCommandSink {
    tx: mpsc::UnboundedSender<(String, SensorCommand)>,
}

impl ChannelCommandSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, SensorCommand)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl CommandSink for ChannelCommandSink {
    async fn send(&self, device_id: &str, command: SensorCommand) -> anyhow::Result<()> {
        self.tx.send((device_id.to_string(), command))?;
        Ok(())
    }
}
