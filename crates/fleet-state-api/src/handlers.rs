use crate::models::{SnapshotResponse, SnapshotRow};
use crate::state::AppState;
use axum::{extract::State, Json};
use tracing::debug;

/// 取全量快照
///
/// 对状态存储只读；并发调用方各自拿到独立一致的副本。
pub async fn get_snapshot(State(state): State<AppState>) -> Json<SnapshotResponse> {
    let snapshot = state.store.snapshot().await;
    debug!(devices = snapshot.len(), "Serving snapshot");

    let data = snapshot
        .devices
        .iter()
        .map(|(id, record)| SnapshotRow::from_record(id, record))
        .collect();

    Json(SnapshotResponse { data })
}
