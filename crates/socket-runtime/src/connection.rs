//! 单个已接受连接：生命周期状态、出站队列与关闭信号。

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use socketry_core::{CloseReason, ConnectionId, ConnectionState, ExecutionMode, PathParams};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::endpoint::{EndpointDescriptor, GroupKey};

/// 一条 WebSocket 消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn binary(value: impl Into<Vec<u8>>) -> Self {
        Self::Binary(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 出站队列中的条目，广播时多个连接共享同一份负载。
pub type Outbound = Arc<Message>;

/// 出站队列的接收端，由传输层写循环独占。
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// 入队失败原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// 连接不再处于 OPEN 状态。
    Closed,
    /// 队列已满。
    Full,
    /// 阻塞等待超时。
    Timeout,
}

pub struct Connection {
    id: ConnectionId,
    endpoint: Arc<EndpointDescriptor>,
    path_params: PathParams,
    group_key: Option<GroupKey>,
    state: AtomicU8,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<Option<OutboundReceiver>>,
    close_token: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    close_callback_claimed: AtomicBool,
    drops: AtomicU64,
    opened_at: DateTime<Utc>,
}

impl Connection {
    pub(crate) fn new(
        endpoint: Arc<EndpointDescriptor>,
        path_params: PathParams,
        send_queue_capacity: usize,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(send_queue_capacity);
        let group_key = endpoint.group_key_for(&path_params);
        Self {
            id: ConnectionId::new(),
            endpoint,
            path_params,
            group_key,
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            close_token: CancellationToken::new(),
            close_reason: Mutex::new(None),
            close_callback_claimed: AtomicBool::new(false),
            drops: AtomicU64::new(0),
            opened_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Arc<EndpointDescriptor> {
        &self.endpoint
    }

    /// 连接被接受时所匹配的路径模板。
    pub fn path(&self) -> &str {
        self.endpoint.path()
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.endpoint.execution_mode()
    }

    pub fn group_key(&self) -> Option<&GroupKey> {
        self.group_key.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// 自连接被接受以来经过的时间。
    pub fn connected_for(&self) -> TimeDelta {
        Utc::now() - self.opened_at
    }

    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// 关闭原因；仅在关闭流程开始后存在。
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 取走出站队列接收端，只能成功一次。
    pub fn take_outbound(&self) -> Option<OutboundReceiver> {
        self.outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// 连接进入关闭流程时完成。
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close_token.cancelled()
    }

    pub fn is_closing(&self) -> bool {
        self.close_token.is_cancelled()
    }

    /// 非阻塞入队。
    pub fn try_send(&self, message: Outbound) -> Result<(), EnqueueError> {
        if !self.is_open() {
            return Err(EnqueueError::Closed);
        }
        self.outbound_tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// 队列满时最多等待 `timeout`；等待期间连接关闭则立即放弃。
    pub async fn send_timeout(
        &self,
        message: Outbound,
        timeout: Duration,
    ) -> Result<(), EnqueueError> {
        if !self.is_open() {
            return Err(EnqueueError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.close_token.cancelled() => Err(EnqueueError::Closed),
            result = self.outbound_tx.send_timeout(message, timeout) => result.map_err(|err| match err {
                SendTimeoutError::Timeout(_) => EnqueueError::Timeout,
                SendTimeoutError::Closed(_) => EnqueueError::Closed,
            }),
        }
    }

    pub(crate) fn record_drop(&self) -> u64 {
        self.drops.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting.as_u8(),
                ConnectionState::Open.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 进入 CLOSING 并发出关闭信号；只有第一次调用返回 `true`。
    pub(crate) fn begin_close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current).is_closing_or_closed() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        *self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.close_token.cancel();
        true
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
    }

    /// on-close 回调每个连接只执行一次。
    pub(crate) fn claim_close_callback(&self) -> bool {
        !self.close_callback_claimed.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.path())
            .field("path_params", &self.path_params)
            .field("group_key", &self.group_key)
            .field("state", &self.state())
            .finish()
    }
}
