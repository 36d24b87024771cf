use fleet_state::SensorStateStore;
use std::sync::Arc;

/// API 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 状态存储
    pub store: Arc<SensorStateStore>,
}

impl AppState {
    pub fn new(store: Arc<SensorStateStore>) -> Self {
        Self { store }
    }
}
