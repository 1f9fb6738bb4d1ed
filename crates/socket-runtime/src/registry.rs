//! 连接注册表：按 ID 索引所有存活连接，并按广播组键分组。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use socketry_core::{CloseReason, ConnectionId, PathParams};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::endpoint::{EndpointDescriptor, EndpointTable, GroupKey};
use crate::error::{Result, RuntimeError};

/// 连接注册表。
///
/// 组成员变更与连接状态迁移在同一把分片锁内完成，
/// 因此任何快照都不会包含已开始关闭的连接。
pub struct ConnectionRegistry {
    endpoints: Arc<EndpointTable>,
    send_queue_capacity: usize,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    groups: DashMap<GroupKey, HashMap<ConnectionId, Weak<Connection>>>,
    open_count: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new(endpoints: Arc<EndpointTable>, send_queue_capacity: usize) -> Self {
        Self {
            endpoints,
            send_queue_capacity,
            connections: DashMap::new(),
            groups: DashMap::new(),
            open_count: AtomicUsize::new(0),
        }
    }

    pub fn endpoints(&self) -> &Arc<EndpointTable> {
        &self.endpoints
    }

    /// 接纳新连接：创建、加入广播组并进入 OPEN 状态。
    #[tracing::instrument(skip(self, descriptor, path_params), fields(path = descriptor.path()))]
    pub fn admit(
        &self,
        descriptor: &Arc<EndpointDescriptor>,
        path_params: PathParams,
    ) -> Result<Arc<Connection>> {
        if !self.endpoints.contains(descriptor) {
            return Err(RuntimeError::EndpointNotFound(descriptor.path().to_string()));
        }

        let connection = Arc::new(Connection::new(
            Arc::clone(descriptor),
            path_params,
            self.send_queue_capacity,
        ));
        let id = connection.id();
        self.connections.insert(id, Arc::clone(&connection));

        match connection.group_key() {
            Some(key) => {
                let mut members = self.groups.entry(key.clone()).or_default();
                members.insert(id, Arc::downgrade(&connection));
                connection.mark_open();
            }
            None => {
                connection.mark_open();
            }
        }
        let _ = self.open_count.fetch_add(1, Ordering::Relaxed);

        info!(
            connection_id = %id,
            group = connection.group_key().map(GroupKey::as_str),
            "connection admitted"
        );
        Ok(connection)
    }

    /// 按请求路径解析端点后接纳连接。
    pub fn admit_path(&self, path: &str) -> Result<Arc<Connection>> {
        let (descriptor, params) = self.endpoints.resolve(path)?;
        self.admit(&descriptor, params)
    }

    /// 正常移除连接；重复调用无副作用。
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.close(id, CloseReason::normal())
    }

    /// 关闭并移除连接，记录关闭原因。
    ///
    /// 仅第一次调用生效并返回该连接，之后返回 `None`。
    pub fn close(&self, id: ConnectionId, reason: CloseReason) -> Option<Arc<Connection>> {
        let connection = self
            .connections
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))?;

        let began = match connection.group_key() {
            Some(key) => {
                let began = match self.groups.get_mut(key) {
                    Some(mut members) => {
                        let began = connection.begin_close(reason.clone());
                        if began {
                            members.remove(&id);
                        }
                        began
                    }
                    None => connection.begin_close(reason.clone()),
                };
                self.groups.remove_if(key, |_, members| members.is_empty());
                began
            }
            None => connection.begin_close(reason.clone()),
        };
        if !began {
            debug!(connection_id = %id, "connection already closing");
            return None;
        }

        self.connections.remove(&id);
        connection.mark_closed();
        let _ = self.open_count.fetch_sub(1, Ordering::Relaxed);

        info!(
            connection_id = %id,
            reason = %reason,
            opened_at = %connection.opened_at(),
            connected_ms = connection.connected_for().num_milliseconds(),
            "connection removed"
        );
        Some(connection)
    }

    /// 关闭全部连接，返回被关闭的数量。
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.close(*id, reason.clone()).is_some())
            .count()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 组内 OPEN 成员的快照。
    pub fn group_members(&self, key: &GroupKey) -> Vec<Arc<Connection>> {
        self.groups
            .get(key)
            .map(|members| {
                members
                    .values()
                    .filter_map(Weak::upgrade)
                    .filter(|connection| connection.is_open())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn group_len(&self, key: &GroupKey) -> usize {
        self.groups.get(key).map_or(0, |members| members.len())
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn open_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 当前存活连接数。
    pub fn len(&self) -> usize {
        self.open_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
