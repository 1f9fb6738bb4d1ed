//! WebSocket 传输层，仅在 `ws-api` feature 启用时可用。

mod adapter;
mod handler;
mod http;

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get};

pub use adapter::{close_frame, from_ws_message, to_ws_message};
pub use handler::websocket_handler;
pub use http::{HTTP_BRIDGE_PREFIX, health_handler, http_bridge_handler};

use crate::runtime::Runtime;

/// 运行时的 axum 路由：健康检查、单次 HTTP 桥接与 WebSocket 升级。
pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/http/{*path}", any(http_bridge_handler))
        .route("/{*path}", get(websocket_handler))
        .with_state(runtime)
}
