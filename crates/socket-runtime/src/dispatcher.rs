//! 事件分发：按端点执行模式调用 handler，并把返回值交给广播协调器投递。
//!
//! - `Serial`：每个连接一条有界 FIFO 通道和一个消费任务，handler 调用
//!   （包括返回值投递）逐条完成后才开始下一条。
//! - `Concurrent`：每条消息独立 spawn，总并发受信号量限制。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures_util::FutureExt;
use metrics::counter;
use socketry_core::{CloseReason, ConnectionId, ExecutionMode};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, warn};

use crate::broadcast::BroadcastCoordinator;
use crate::connection::{Connection, Message};
use crate::endpoint::{EventKind, HandlerContext, Reply};
use crate::error::{Result, RuntimeError};
use crate::registry::ConnectionRegistry;

/// 一次 handler 调用的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed,
    /// handler 返回错误或 panic，连接已被关闭。
    Failed(String),
    /// 调用开始前或进行中连接已关闭。
    Cancelled,
}

impl InvocationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// 已受理的入站消息，可等待其处理结果。
#[derive(Debug)]
pub struct Invocation {
    connection_id: ConnectionId,
    receiver: oneshot::Receiver<InvocationOutcome>,
}

impl Invocation {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub async fn outcome(self) -> InvocationOutcome {
        self.receiver.await.unwrap_or(InvocationOutcome::Cancelled)
    }
}

struct LaneItem {
    message: Message,
    done: oneshot::Sender<InvocationOutcome>,
}

/// 串行通道的发送端；`generation` 区分同一连接先后创建的通道。
struct Lane {
    generation: u64,
    tx: mpsc::Sender<LaneItem>,
}

type LaneMap = DashMap<ConnectionId, Lane>;

pub struct Dispatcher {
    broadcaster: Arc<BroadcastCoordinator>,
    concurrency: Arc<Semaphore>,
    inbound_capacity: usize,
    lanes: Arc<LaneMap>,
    next_generation: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        broadcaster: Arc<BroadcastCoordinator>,
        concurrent_limit: usize,
        inbound_capacity: usize,
    ) -> Self {
        Self {
            broadcaster,
            concurrency: Arc::new(Semaphore::new(concurrent_limit)),
            inbound_capacity,
            lanes: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.broadcaster.registry()
    }

    /// 执行 on-open，在其完成之前不应分发任何入站消息。
    pub async fn open(&self, connection: &Arc<Connection>) -> Result<()> {
        if connection.execution_mode().is_serial() {
            let _ = self.lane_for(connection);
        }

        let outcome = invoke(
            Arc::clone(&self.broadcaster),
            Arc::clone(connection),
            EventKind::Open,
            None,
        )
        .await;
        match outcome {
            InvocationOutcome::Completed => Ok(()),
            InvocationOutcome::Failed(message) => Err(RuntimeError::HandlerInvocation {
                connection_id: connection.id(),
                message,
            }),
            InvocationOutcome::Cancelled => Err(RuntimeError::ConnectionClosed(connection.id())),
        }
    }

    /// 受理一条入站消息，不等待 handler 执行。
    pub fn dispatch(&self, connection: &Arc<Connection>, message: Message) -> Result<Invocation> {
        if !connection.is_open() {
            return Err(RuntimeError::ConnectionClosed(connection.id()));
        }

        let (done, receiver) = oneshot::channel();
        let invocation = Invocation {
            connection_id: connection.id(),
            receiver,
        };

        match connection.execution_mode() {
            ExecutionMode::Serial => {
                let lane = self.lane_for(connection);
                match lane.try_send(LaneItem { message, done }) {
                    Ok(()) => Ok(invocation),
                    Err(TrySendError::Full(_)) => {
                        warn!(connection_id = %connection.id(), "inbound queue saturated");
                        counter!("ws_inbound_overflow_total").increment(1);
                        self.lanes.remove(&connection.id());
                        self.registry()
                            .close(connection.id(), CloseReason::inbound_overflow());
                        Err(RuntimeError::Backpressure {
                            connection_id: connection.id(),
                            reason: "inbound queue saturated".to_string(),
                        })
                    }
                    Err(TrySendError::Closed(_)) => {
                        Err(RuntimeError::ConnectionClosed(connection.id()))
                    }
                }
            }
            ExecutionMode::Concurrent => {
                let broadcaster = Arc::clone(&self.broadcaster);
                let semaphore = Arc::clone(&self.concurrency);
                let connection = Arc::clone(connection);
                tokio::spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = connection.closed() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    let outcome = match permit {
                        Some(_permit) => {
                            invoke(broadcaster, connection, EventKind::Message, Some(message))
                                .await
                        }
                        None => InvocationOutcome::Cancelled,
                    };
                    let _ = done.send(outcome);
                });
                Ok(invocation)
            }
        }
    }

    /// 关闭连接并执行 on-close；对同一连接重复调用时 on-close 只执行一次。
    ///
    /// 连接可能已被其他路径关闭（handler 失败、背压），此处仍会补上 on-close。
    pub async fn close(&self, connection: &Arc<Connection>, reason: CloseReason) {
        self.lanes.remove(&connection.id());
        self.registry().close(connection.id(), reason);

        if !connection.claim_close_callback() {
            return;
        }
        let Some(binding) = connection.endpoint().binding(EventKind::Close).cloned() else {
            return;
        };
        let ctx = HandlerContext::new(Arc::clone(connection), Arc::clone(&self.broadcaster));
        if let Err(message) = call_handler(&binding, ctx, None).await {
            warn!(connection_id = %connection.id(), error = %message, "on_close handler failed");
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// 取得连接的串行通道，不存在时创建。
    ///
    /// 通道任务退出时会移除自己的表项，因此与 `close` 竞争时新建的通道不会残留。
    fn lane_for(&self, connection: &Arc<Connection>) -> mpsc::Sender<LaneItem> {
        self.lanes
            .entry(connection.id())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.inbound_capacity);
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(run_lane(
                    Arc::clone(&self.broadcaster),
                    Arc::clone(connection),
                    rx,
                    Arc::clone(&self.lanes),
                    generation,
                ));
                Lane { generation, tx }
            })
            .tx
            .clone()
    }
}

async fn run_lane(
    broadcaster: Arc<BroadcastCoordinator>,
    connection: Arc<Connection>,
    mut rx: mpsc::Receiver<LaneItem>,
    lanes: Arc<LaneMap>,
    generation: u64,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = connection.closed() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let outcome = invoke(
            Arc::clone(&broadcaster),
            Arc::clone(&connection),
            EventKind::Message,
            Some(item.message),
        )
        .await;
        let _ = item.done.send(outcome);
    }
    lanes.remove_if(&connection.id(), |_, lane| lane.generation == generation);
    debug!(connection_id = %connection.id(), "serial lane stopped");
}

/// 调用 handler 并投递返回值；连接关闭时放弃调用。
async fn invoke(
    broadcaster: Arc<BroadcastCoordinator>,
    connection: Arc<Connection>,
    kind: EventKind,
    input: Option<Message>,
) -> InvocationOutcome {
    let Some(binding) = connection.endpoint().binding(kind).cloned() else {
        return InvocationOutcome::Completed;
    };
    if !connection.is_open() {
        return InvocationOutcome::Cancelled;
    }

    let ctx = HandlerContext::new(Arc::clone(&connection), Arc::clone(&broadcaster));
    let result = tokio::select! {
        biased;
        _ = connection.closed() => return InvocationOutcome::Cancelled,
        result = call_handler(&binding, ctx, input) => result,
    };

    let reply = match result {
        Ok(reply) => reply,
        Err(message) => {
            warn!(
                connection_id = %connection.id(),
                event = %kind,
                error = %message,
                "handler failed, closing connection"
            );
            counter!("ws_handler_failures_total").increment(1);
            broadcaster
                .registry()
                .close(connection.id(), CloseReason::handler_failed(&message));
            return InvocationOutcome::Failed(message);
        }
    };

    deliver_reply(&broadcaster, &connection, binding.broadcast(), reply).await;
    InvocationOutcome::Completed
}

async fn call_handler(
    binding: &crate::endpoint::HandlerBinding,
    ctx: HandlerContext,
    input: Option<Message>,
) -> std::result::Result<Reply, String> {
    match AssertUnwindSafe(binding.handler().handle(ctx, input))
        .catch_unwind()
        .await
    {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(panic_message(payload)),
    }
}

async fn deliver_reply(
    broadcaster: &BroadcastCoordinator,
    connection: &Arc<Connection>,
    broadcast: bool,
    reply: Reply,
) {
    for message in reply.into_messages() {
        if broadcast {
            broadcaster.broadcast(connection, message).await;
        } else if let Err(err) = broadcaster.send_to(connection, message).await {
            debug!(connection_id = %connection.id(), error = %err, "reply not delivered");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}
