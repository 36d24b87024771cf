use crate::models::SnapshotResponse;
use async_trait::async_trait;
use chrono::Utc;
use fleet_types::FleetSnapshot;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// 编排器看到的快照来源
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<FleetSnapshot>;
}

/// 快照端点的 HTTP 客户端
///
/// 可以与状态存储同进程，也可以跨进程/跨主机访问。
pub struct SnapshotClient {
    base_url: String,
    http: reqwest::Client,
}

impl SnapshotClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SnapshotSource for SnapshotClient {
    async fn fetch(&self) -> anyhow::Result<FleetSnapshot> {
        let url = format!("{}/api/v1/snapshot", self.base_url.trim_end_matches('/'));
        let response: SnapshotResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let devices: BTreeMap<_, _> = response
            .data
            .iter()
            .map(|row| (row.id.clone(), row.to_record()))
            .collect();

        debug!(devices = devices.len(), "Snapshot fetched");
        Ok(FleetSnapshot::new(Utc::now(), devices))
    }
}
