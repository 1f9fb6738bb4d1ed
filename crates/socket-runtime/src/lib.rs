pub mod broadcast;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod http_bridge;
pub mod registry;
pub mod runtime;

#[cfg(feature = "ws-api")]
pub mod ws_api;

pub use broadcast::{BackpressurePolicy, BroadcastCoordinator, BroadcastReport, DeliveryStatsSnapshot};
pub use config::{BackpressureConfig, BackpressureMode, RuntimeConfig};
pub use connection::{Connection, Message, OutboundReceiver};
pub use dispatcher::{Dispatcher, Invocation, InvocationOutcome};
pub use endpoint::{
    EndpointBuilder, EndpointDescriptor, EndpointTable, EventKind, GroupKey, GroupKeyStrategy,
    Handler, HandlerBinding, HandlerContext, Reply,
};
pub use error::{Result, RuntimeError};
pub use registry::ConnectionRegistry;
pub use runtime::Runtime;
pub use socketry_core::{CloseCode, CloseReason, ConnectionId, ConnectionState, ExecutionMode};
