//! 端点声明：路径模板、执行模式、事件 handler 绑定与广播分组规则。
//!
//! 端点在启动阶段通过 [`EndpointBuilder`] 显式构建并注册到
//! [`EndpointTable`]，运行期不再变更。

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use socketry_core::{ExecutionMode, PathParams, PathTemplate};

use crate::connection::Message;
use crate::error::{Result, RuntimeError};

mod context;
mod handler;
mod table;

pub use context::HandlerContext;
pub use handler::{Handler, HandlerBinding, Reply};
pub use table::EndpointTable;

use handler::{CloseFn, MessageFn, OpenFn};

/// handler 绑定的事件类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Open,
    Message,
    Close,
}

impl EventKind {
    pub const ALL: [Self; 3] = [Self::Open, Self::Message, Self::Close];
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "on_open",
            Self::Message => "on_message",
            Self::Close => "on_close",
        };
        f.write_str(name)
    }
}

/// 广播分组键。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

type GroupKeyFn = dyn Fn(&PathTemplate, &PathParams) -> Option<GroupKey> + Send + Sync;

/// 连接如何归入广播组。
#[derive(Clone, Default)]
pub enum GroupKeyStrategy {
    /// 同一端点的所有连接属于同一组，与路径参数值无关。
    #[default]
    Template,
    /// 按某个路径参数的取值分组。
    PathParam(String),
    /// 不加入任何组，广播只回到发送方自身。
    Isolated,
    /// 自定义分组函数。
    Custom(Arc<GroupKeyFn>),
}

impl GroupKeyStrategy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&PathTemplate, &PathParams) -> Option<GroupKey> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn key_for(&self, template: &PathTemplate, params: &PathParams) -> Option<GroupKey> {
        match self {
            Self::Template => Some(GroupKey::new(template.as_str())),
            Self::PathParam(name) => params
                .get(name)
                .map(|value| GroupKey::new(format!("{template}#{name}={value}"))),
            Self::Isolated => None,
            Self::Custom(f) => f(template, params),
        }
    }
}

impl std::fmt::Debug for GroupKeyStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Template => f.write_str("Template"),
            Self::PathParam(name) => f.debug_tuple("PathParam").field(name).finish(),
            Self::Isolated => f.write_str("Isolated"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// 已注册端点的静态声明。
#[derive(Debug)]
pub struct EndpointDescriptor {
    template: PathTemplate,
    execution_mode: ExecutionMode,
    group_key: GroupKeyStrategy,
    on_open: Option<HandlerBinding>,
    on_message: Option<HandlerBinding>,
    on_close: Option<HandlerBinding>,
}

impl EndpointDescriptor {
    pub fn path(&self) -> &str {
        self.template.as_str()
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn binding(&self, kind: EventKind) -> Option<&HandlerBinding> {
        match kind {
            EventKind::Open => self.on_open.as_ref(),
            EventKind::Message => self.on_message.as_ref(),
            EventKind::Close => self.on_close.as_ref(),
        }
    }

    pub fn group_key_for(&self, params: &PathParams) -> Option<GroupKey> {
        self.group_key.key_for(&self.template, params)
    }
}

/// 端点声明构建器。
///
/// 同一事件类型绑定多个 handler 会在 [`EndpointBuilder::build`] 时报错，
/// 结果与绑定顺序无关。
#[derive(Debug)]
pub struct EndpointBuilder {
    path: String,
    execution_mode: ExecutionMode,
    group_key: GroupKeyStrategy,
    bindings: Vec<(EventKind, HandlerBinding)>,
}

impl EndpointBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            execution_mode: ExecutionMode::default(),
            group_key: GroupKeyStrategy::default(),
            bindings: Vec::new(),
        }
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn group_by(mut self, strategy: GroupKeyStrategy) -> Self {
        self.group_key = strategy;
        self
    }

    pub fn bind(mut self, kind: EventKind, binding: HandlerBinding) -> Self {
        self.bindings.push((kind, binding));
        self
    }

    /// 连接建立时调用；`broadcast` 为真时返回值发送给组内所有连接。
    pub fn on_open<F, Fut>(self, broadcast: bool, f: F) -> Self
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.bind(EventKind::Open, HandlerBinding::new(OpenFn(f), broadcast))
    }

    /// 每条入站消息调用一次。
    pub fn on_message<F, Fut>(self, broadcast: bool, f: F) -> Self
    where
        F: Fn(HandlerContext, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.bind(
            EventKind::Message,
            HandlerBinding::new(MessageFn(f), broadcast),
        )
    }

    pub fn on_close<F, Fut>(self, f: F) -> Self
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bind(EventKind::Close, HandlerBinding::new(CloseFn(f), false))
    }

    pub fn build(self) -> Result<EndpointDescriptor> {
        let template = PathTemplate::parse(self.path)?;

        for kind in EventKind::ALL {
            let count = self.bindings.iter().filter(|(k, _)| *k == kind).count();
            if count > 1 {
                return Err(RuntimeError::DuplicateHandler {
                    path: template.as_str().to_string(),
                    kind,
                });
            }
        }

        if let GroupKeyStrategy::PathParam(name) = &self.group_key
            && !template.param_names().any(|declared| declared == name)
        {
            return Err(RuntimeError::Config(format!(
                "endpoint {template} groups by undeclared path parameter {name}"
            )));
        }

        let mut descriptor = EndpointDescriptor {
            template,
            execution_mode: self.execution_mode,
            group_key: self.group_key,
            on_open: None,
            on_message: None,
            on_close: None,
        };
        for (kind, binding) in self.bindings {
            match kind {
                EventKind::Open => descriptor.on_open = Some(binding),
                EventKind::Message => descriptor.on_message = Some(binding),
                EventKind::Close => descriptor.on_close = Some(binding),
            }
        }
        Ok(descriptor)
    }
}
