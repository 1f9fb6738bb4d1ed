//! 广播扇出：把一条负载投递给广播组内的每个 OPEN 连接。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use metrics::counter;
use socketry_api_types::DeliveryCounters;
use socketry_core::{CloseReason, ConnectionId};
use tracing::{debug, warn};

use crate::connection::{Connection, EnqueueError, Message, Outbound};
use crate::endpoint::GroupKey;
use crate::error::{Result, RuntimeError};
use crate::registry::ConnectionRegistry;

/// 出站队列饱和时的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// 最多阻塞 `timeout`，超时后强制关闭慢连接。
    Block { timeout: Duration },
    /// 丢弃并计数；累计丢弃达到 `max_drops` 时强制关闭。
    Drop { max_drops: u64 },
    /// 立即强制关闭慢连接。
    Close,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::Block {
            timeout: Duration::from_secs(1),
        }
    }
}

/// 单个连接的投递结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
    ForcedClose,
    /// 投递时连接已不在 OPEN 状态。
    Skipped,
}

/// 一次广播的结果汇总。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub skipped: usize,
    /// 因背压被强制关闭的连接。
    pub closed: Vec<ConnectionId>,
}

impl BroadcastReport {
    fn record(&mut self, connection_id: ConnectionId, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Dropped => self.dropped += 1,
            Delivery::ForcedClose => self.closed.push(connection_id),
            Delivery::Skipped => self.skipped += 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.delivered == self.recipients
    }
}

/// 投递计数，进程内可读。
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    forced_closes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStatsSnapshot {
    pub delivered: u64,
    pub dropped: u64,
    pub forced_closes: u64,
}

impl From<DeliveryStatsSnapshot> for DeliveryCounters {
    fn from(snapshot: DeliveryStatsSnapshot) -> Self {
        Self {
            delivered: snapshot.delivered,
            dropped: snapshot.dropped,
            forced_closes: snapshot.forced_closes,
        }
    }
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            forced_closes: self.forced_closes.load(Ordering::Relaxed),
        }
    }
}

pub struct BroadcastCoordinator {
    registry: Arc<ConnectionRegistry>,
    policy: BackpressurePolicy,
    stats: DeliveryStats,
}

impl BroadcastCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, policy: BackpressurePolicy) -> Self {
        Self {
            registry,
            policy,
            stats: DeliveryStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// 投递给 `source` 所在广播组的全部 OPEN 成员，包括 `source` 自身。
    ///
    /// 不属于任何组的连接只投递给自己。
    pub async fn broadcast(&self, source: &Connection, payload: Message) -> BroadcastReport {
        let members = match source.group_key() {
            Some(key) => self.registry.group_members(key),
            None => self
                .registry
                .get(source.id())
                .filter(|connection| connection.is_open())
                .into_iter()
                .collect(),
        };
        let label = source.group_key().map_or("self", GroupKey::as_str);
        self.fan_out(members, Arc::new(payload), label).await
    }

    /// 由服务端直接向某个广播组推送。
    pub async fn broadcast_to_group(&self, key: &GroupKey, payload: Message) -> BroadcastReport {
        let members = self.registry.group_members(key);
        self.fan_out(members, Arc::new(payload), key.as_str()).await
    }

    /// 发送给单个连接，同样遵循背压策略。
    pub async fn send_to(&self, connection: &Arc<Connection>, payload: Message) -> Result<()> {
        match self.deliver(connection, Arc::new(payload)).await {
            Delivery::Delivered => Ok(()),
            Delivery::Skipped => Err(RuntimeError::ConnectionClosed(connection.id())),
            Delivery::Dropped => Err(RuntimeError::Backpressure {
                connection_id: connection.id(),
                reason: "message dropped".to_string(),
            }),
            Delivery::ForcedClose => Err(RuntimeError::Backpressure {
                connection_id: connection.id(),
                reason: "slow consumer closed".to_string(),
            }),
        }
    }

    async fn fan_out(
        &self,
        members: Vec<Arc<Connection>>,
        payload: Outbound,
        label: &str,
    ) -> BroadcastReport {
        let mut report = BroadcastReport {
            recipients: members.len(),
            ..BroadcastReport::default()
        };

        let deliveries = join_all(
            members
                .iter()
                .map(|member| self.deliver(member, Arc::clone(&payload))),
        )
        .await;
        for (member, delivery) in members.iter().zip(deliveries) {
            report.record(member.id(), delivery);
        }

        debug!(
            label,
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed.len(),
            "broadcast payload"
        );
        report
    }

    async fn deliver(&self, connection: &Arc<Connection>, payload: Outbound) -> Delivery {
        let delivery = match self.policy {
            BackpressurePolicy::Block { timeout } => {
                match connection.send_timeout(payload, timeout).await {
                    Ok(()) => Delivery::Delivered,
                    Err(EnqueueError::Closed) => Delivery::Skipped,
                    Err(EnqueueError::Full | EnqueueError::Timeout) => {
                        self.force_close(connection, "send timed out")
                    }
                }
            }
            BackpressurePolicy::Drop { max_drops } => match connection.try_send(payload) {
                Ok(()) => Delivery::Delivered,
                Err(EnqueueError::Closed) => Delivery::Skipped,
                Err(EnqueueError::Full | EnqueueError::Timeout) => {
                    let drops = connection.record_drop();
                    let _ = self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    counter!("ws_broadcast_drops_total").increment(1);
                    if drops >= max_drops {
                        self.force_close(connection, "drop limit reached")
                    } else {
                        warn!(
                            connection_id = %connection.id(),
                            total_drops = drops,
                            "failed to enqueue message (queue full)"
                        );
                        Delivery::Dropped
                    }
                }
            },
            BackpressurePolicy::Close => match connection.try_send(payload) {
                Ok(()) => Delivery::Delivered,
                Err(EnqueueError::Closed) => Delivery::Skipped,
                Err(EnqueueError::Full | EnqueueError::Timeout) => {
                    self.force_close(connection, "queue full")
                }
            },
        };

        if delivery == Delivery::Delivered {
            let _ = self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
        delivery
    }

    fn force_close(&self, connection: &Connection, cause: &str) -> Delivery {
        warn!(connection_id = %connection.id(), cause, "disconnecting slow client");
        let _ = self.stats.forced_closes.fetch_add(1, Ordering::Relaxed);
        counter!("ws_forced_closes_total").increment(1);
        self.registry
            .close(connection.id(), CloseReason::slow_consumer());
        Delivery::ForcedClose
    }
}
