use ctxbridge_protocol::ProtocolError;

/// Errors reported by a channel adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The transport refused or failed to deliver a message.
    #[error("failed to send {kind} message: {reason}")]
    Send { kind: &'static str, reason: String },

    /// The transport could not register an inbound handler.
    #[error("failed to register message handler: {0}")]
    Register(String),

    /// The channel has been closed.
    #[error("channel closed")]
    Closed,

    /// The message could not be encoded for the transport.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, AdapterError>;
