use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::HandlerContext;
use crate::connection::Message;

/// handler 的返回内容。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Reply {
    /// 不回复。
    #[default]
    Empty,
    /// 回复一条消息。
    Single(Message),
    /// 按顺序回复多条消息。
    Many(Vec<Message>),
}

impl Reply {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Single(Message::text(value))
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Empty => Vec::new(),
            Self::Single(message) => vec![message],
            Self::Many(messages) => messages,
        }
    }
}

impl From<Message> for Reply {
    fn from(value: Message) -> Self {
        Self::Single(value)
    }
}

impl From<Option<Message>> for Reply {
    fn from(value: Option<Message>) -> Self {
        value.map_or(Self::Empty, Self::Single)
    }
}

impl From<Vec<Message>> for Reply {
    fn from(value: Vec<Message>) -> Self {
        Self::Many(value)
    }
}

/// 端点事件处理接口。
///
/// `input` 仅在 on-message 事件中携带入站消息，其余事件为 `None`。
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext, input: Option<Message>) -> anyhow::Result<Reply>;
}

/// 事件 handler 及其投递方式。
#[derive(Clone)]
pub struct HandlerBinding {
    handler: Arc<dyn Handler>,
    broadcast: bool,
}

impl HandlerBinding {
    pub fn new(handler: impl Handler + 'static, broadcast: bool) -> Self {
        Self {
            handler: Arc::new(handler),
            broadcast,
        }
    }

    pub fn from_arc(handler: Arc<dyn Handler>, broadcast: bool) -> Self {
        Self { handler, broadcast }
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// 返回值是否发送给广播组内所有连接。
    pub fn broadcast(&self) -> bool {
        self.broadcast
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("broadcast", &self.broadcast)
            .finish_non_exhaustive()
    }
}

pub(super) struct OpenFn<F>(pub(super) F);

#[async_trait]
impl<F, Fut> Handler for OpenFn<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, _input: Option<Message>) -> anyhow::Result<Reply> {
        (self.0)(ctx).await
    }
}

pub(super) struct MessageFn<F>(pub(super) F);

#[async_trait]
impl<F, Fut> Handler for MessageFn<F>
where
    F: Fn(HandlerContext, Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, input: Option<Message>) -> anyhow::Result<Reply> {
        match input {
            Some(message) => (self.0)(ctx, message).await,
            None => Ok(Reply::Empty),
        }
    }
}

pub(super) struct CloseFn<F>(pub(super) F);

#[async_trait]
impl<F, Fut> Handler for CloseFn<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, _input: Option<Message>) -> anyhow::Result<Reply> {
        (self.0)(ctx).await?;
        Ok(Reply::Empty)
    }
}
