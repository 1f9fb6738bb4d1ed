//! API 路由模块。
//!
//! 在运行时路由之上挂载 `/metrics`，并叠加跨域与请求追踪中间件。

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use socket_runtime::Runtime;
use socket_runtime::ws_api;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;

pub fn create_router(runtime: Arc<Runtime>, metrics: PrometheusHandle) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    ws_api::router(runtime)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
