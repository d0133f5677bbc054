/// Errors raised by envelope validation and value conversion.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The candidate is absent or not an object.
    #[error("not a message: candidate is absent or not an object")]
    NotAMessage,

    /// A message field failed structural validation.
    #[error("invalid message field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    /// The value contains a reference back to one of its ancestors.
    #[error("value contains a circular reference")]
    Circular,

    /// The value holds a leaf that has no JSON representation.
    #[error("value of kind '{0}' cannot be represented as JSON")]
    NotSerializable(&'static str),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
