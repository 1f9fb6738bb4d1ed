use std::sync::Arc;

use socketry_api_types::{HttpRequest, HttpResponse};
use socketry_core::{CloseReason, PathParams};
use tracing::info;

use crate::broadcast::BroadcastCoordinator;
use crate::config::RuntimeConfig;
use crate::connection::{Connection, Message};
use crate::dispatcher::{Dispatcher, Invocation};
use crate::endpoint::{EndpointDescriptor, EndpointTable};
use crate::error::{Result, RuntimeError};
use crate::registry::ConnectionRegistry;

/// 运行时门面：持有端点表、连接注册表、广播协调器与分发器。
///
/// 传输层只需通过 [`Runtime::accept`]、[`Runtime::on_frame`] 与
/// [`Runtime::on_disconnect`] 三个入口交互。
pub struct Runtime {
    config: Arc<RuntimeConfig>,
    endpoints: Arc<EndpointTable>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<BroadcastCoordinator>,
    dispatcher: Arc<Dispatcher>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, endpoints: EndpointTable) -> Result<Self> {
        config
            .validate()
            .map_err(|err| RuntimeError::Config(format!("{err:#}")))?;

        info!(
            endpoint_count = endpoints.len(),
            send_queue_capacity = config.send_queue_capacity,
            concurrent_limit = config.concurrent_limit,
            backpressure = ?config.backpressure.policy(),
            "initializing socket runtime"
        );

        let endpoints = Arc::new(endpoints);
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&endpoints),
            config.send_queue_capacity,
        ));
        let broadcaster = Arc::new(BroadcastCoordinator::new(
            Arc::clone(&registry),
            config.backpressure.policy(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&broadcaster),
            config.concurrent_limit,
            config.inbound_queue_capacity,
        ));

        Ok(Self {
            config: Arc::new(config),
            endpoints,
            registry,
            broadcaster,
            dispatcher,
        })
    }

    pub fn resolve(&self, path: &str) -> Result<(Arc<EndpointDescriptor>, PathParams)> {
        self.endpoints.resolve(path)
    }

    /// 接受一个新连接：解析路径、登记并执行 on-open。
    #[tracing::instrument(skip(self))]
    pub async fn accept(&self, path: &str) -> Result<Arc<Connection>> {
        let (descriptor, params) = self.resolve(path)?;
        self.accept_resolved(&descriptor, params).await
    }

    /// 已在升级前完成路径解析时使用。
    pub async fn accept_resolved(
        &self,
        descriptor: &Arc<EndpointDescriptor>,
        params: PathParams,
    ) -> Result<Arc<Connection>> {
        let connection = self.registry.admit(descriptor, params)?;
        if let Err(err) = self.dispatcher.open(&connection).await {
            self.dispatcher
                .close(&connection, CloseReason::handler_failed(err.to_string()))
                .await;
            return Err(err);
        }
        Ok(connection)
    }

    pub fn on_frame(&self, connection: &Arc<Connection>, message: Message) -> Result<Invocation> {
        self.dispatcher.dispatch(connection, message)
    }

    /// 对端断开或传输出错时调用；可重复调用。
    pub async fn on_disconnect(&self, connection: &Arc<Connection>) {
        self.on_disconnect_with(connection, CloseReason::normal())
            .await;
    }

    pub async fn on_disconnect_with(&self, connection: &Arc<Connection>, reason: CloseReason) {
        self.dispatcher.close(connection, reason).await;
    }

    pub async fn dispatch_http(&self, request: HttpRequest) -> HttpResponse {
        crate::http_bridge::dispatch_http(self, request).await
    }

    /// 以 1001 关闭全部连接，返回关闭的数量。
    pub async fn shutdown(&self) -> usize {
        let connections = self.registry.open_connections();
        let count = connections.len();
        for connection in connections {
            self.dispatcher
                .close(&connection, CloseReason::going_away())
                .await;
        }
        info!(closed = count, "socket runtime shut down");
        count
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Arc<EndpointTable> {
        &self.endpoints
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<BroadcastCoordinator> {
        &self.broadcaster
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
