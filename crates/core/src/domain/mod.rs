mod close_reason;
mod connection_state;
mod error;
mod execution_mode;
mod ids;
mod path_template;

pub use close_reason::{CloseCode, CloseReason};
pub use connection_state::ConnectionState;
pub use error::DomainError;
pub use execution_mode::ExecutionMode;
pub use ids::ConnectionId;
pub use path_template::{PathParams, PathTemplate};
