pub mod api;
pub mod client;
pub mod handlers;
pub mod models;
pub mod state;

pub use api::{create_router, serve};
pub use client::{SnapshotClient, SnapshotSource};
pub use models::{SnapshotResponse, SnapshotRow};
pub use state::AppState;
