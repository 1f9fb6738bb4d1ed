use std::sync::Arc;

use socketry_core::{CloseReason, ConnectionId};

use crate::broadcast::{BroadcastCoordinator, BroadcastReport};
use crate::connection::{Connection, Message};
use crate::error::Result;

/// handler 调用时可访问的当前连接视图。
#[derive(Clone)]
pub struct HandlerContext {
    connection: Arc<Connection>,
    broadcaster: Arc<BroadcastCoordinator>,
}

impl HandlerContext {
    pub(crate) fn new(connection: Arc<Connection>, broadcaster: Arc<BroadcastCoordinator>) -> Self {
        Self {
            connection,
            broadcaster,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.connection.path_param(name)
    }

    /// 直接发送给当前连接。
    pub async fn send(&self, message: Message) -> Result<()> {
        self.broadcaster.send_to(&self.connection, message).await
    }

    /// 发送给当前连接所在广播组的全部连接（含自身）。
    pub async fn broadcast(&self, message: Message) -> BroadcastReport {
        self.broadcaster.broadcast(&self.connection, message).await
    }

    /// 当前所有处于 OPEN 状态的连接。
    pub fn open_connections(&self) -> Vec<Arc<Connection>> {
        self.broadcaster.registry().open_connections()
    }

    /// 主动关闭当前连接。
    pub fn close(&self, reason: CloseReason) {
        self.broadcaster.registry().close(self.connection.id(), reason);
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
