use crate::{handlers, state::AppState};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// 创建 API 路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 快照 API
        .route("/api/v1/snapshot", get(handlers::get_snapshot))
        // 添加中间件
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 启动快照端点
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Snapshot endpoint listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

/// 健康检查
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotResponse;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fleet_state::{AuditWriter, SensorStateStore};
    use fleet_types::TelemetryPatch;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app_with_one_device() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SensorStateStore::open(
            dir.path().join("state.json"),
            AuditWriter::spawn(dir.path().join("logs")),
        ));
        let patch = TelemetryPatch {
            voltage_mv: Some(3850),
            access_point: Some("EvoStation1".to_string()),
            ..Default::default()
        };
        store.apply_patch("S1", &patch, chrono::Utc::now()).await;

        (create_router(AppState::new(store)), dir)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (app, _dir) = app_with_one_device().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn snapshot_returns_stringified_rows() {
        let (app, _dir) = app_with_one_device().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/snapshot")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: SnapshotResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].id, "S1");
        assert_eq!(parsed.data[0].fields["v"], "3850");
        assert_eq!(parsed.data[0].fields["AP"], "EvoStation1");
    }
}
