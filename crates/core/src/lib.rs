//! Endpoint and connection vocabulary shared by the runtime and the server.

pub mod domain;

pub use domain::{
    CloseCode, CloseReason, ConnectionId, ConnectionState, DomainError, ExecutionMode, PathParams,
    PathTemplate,
};
