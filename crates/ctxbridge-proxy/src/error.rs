use std::time::Duration;

use ctxbridge_adapter::AdapterError;
use ctxbridge_protocol::ProtocolError;

/// Errors that can occur in provider and injector operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Options were rejected before any channel was touched.
    #[error("{0}")]
    InvalidConfig(String),

    /// No provider answered a liveness probe in time.
    #[error("provider unavailable: heartbeat check timeout {}ms", .0.as_millis())]
    HeartbeatTimeout(Duration),

    /// The remote method failed. Carries the remote error text verbatim.
    #[error("{0}")]
    Remote(String),

    /// The path does not name a member of the target.
    #[error("member not found: {0}")]
    MemberNotFound(String),

    /// The path names a member that cannot be invoked.
    #[error("member is not callable: {0}")]
    NotCallable(String),

    /// A call was issued on a handle with no path.
    #[error("cannot call the root of a proxy; select a member first")]
    EmptyPath,

    /// The reply listener was dropped before a reply arrived.
    #[error("channel closed before a reply arrived")]
    ChannelClosed,

    /// Dispatch needs a tokio runtime and none is running.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// Adapter-level error.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Value conversion error.
    #[error("value error: {0}")]
    Value(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
