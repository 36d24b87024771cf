use fleet_types::{topic, InboundMessage};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// 遥测订阅端
///
/// 持有 MQTT 会话，把入站 (topic, payload) 无阻塞地转发进处理队列。
/// 本层只负责传输，从不尝试解码净荷。
pub struct TelemetrySubscriber {
    client: AsyncClient,
}

impl TelemetrySubscriber {
    /// 建立会话并启动事件循环
    ///
    /// 每次重连成功（ConnAck）后重新订阅，连接丢失按指数退避无限重试。
    pub fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        credentials: Option<(String, String)>,
        topics: Vec<String>,
        queue: mpsc::Sender<InboundMessage>,
    ) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let Some((username, password)) = credentials {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);

        let loop_client = client.clone();
        tokio::spawn(async move {
            Self::run_event_loop(loop_client, eventloop, topics, queue).await;
        });

        info!(broker = %format!("{}:{}", host, port), client_id = %client_id, "Telemetry subscriber started");

        Self { client }
    }

    async fn run_event_loop(
        client: AsyncClient,
        mut eventloop: EventLoop,
        topics: Vec<String>,
        queue: mpsc::Sender<InboundMessage>,
    ) {
        let mut backoff = RECONNECT_MIN;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff = RECONNECT_MIN;
                    info!("Connected to MQTT broker");
                    for topic in &topics {
                        if let Err(e) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                            error!(topic = %topic, error = %e, "Failed to subscribe");
                        } else {
                            info!(topic = %topic, "Subscribed to topic");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // 指令回显不属于遥测
                    if topic::is_command_echo(&publish.topic) {
                        continue;
                    }

                    let message = InboundMessage::new(publish.topic, publish.payload);
                    match queue.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(dropped)) => {
                            warn!(topic = %dropped.topic, "Ingestion queue full, dropping message");
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!("Ingestion queue closed, stopping telemetry loop");
                            break;
                        }
                    }
                }
                Ok(event) => {
                    debug!(?event, "MQTT event");
                }
                Err(e) => {
                    error!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                }
            }
        }
    }

    /// 断开会话
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}
