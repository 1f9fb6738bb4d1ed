//! Prometheus 指标：安装全局 recorder 并渲染 `/metrics`。
//!
//! 运行时通过 `metrics::counter!` 记录投递丢弃、强制断开、入站溢出和 handler 失败，
//! 未安装 recorder 时这些计数不可见。

use anyhow::Context;
use axum::extract::State;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// 广播丢弃总数。
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// 因背压被强制断开的连接总数。
pub const WS_FORCED_CLOSES_TOTAL: &str = "ws_forced_closes_total";
/// 串行入站队列溢出次数。
pub const WS_INBOUND_OVERFLOW_TOTAL: &str = "ws_inbound_overflow_total";
/// handler 失败次数。
pub const WS_HANDLER_FAILURES_TOTAL: &str = "ws_handler_failures_total";

/// 安装全局 recorder，进程内只能调用一次。
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;
    describe();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(
        WS_BROADCAST_DROPS_TOTAL,
        "messages dropped because a send queue was full"
    );
    metrics::describe_counter!(
        WS_FORCED_CLOSES_TOTAL,
        "connections closed for failing to keep up"
    );
    metrics::describe_counter!(
        WS_INBOUND_OVERFLOW_TOTAL,
        "serial connections closed on inbound overflow"
    );
    metrics::describe_counter!(WS_HANDLER_FAILURES_TOTAL, "handler errors and panics");
}

pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
