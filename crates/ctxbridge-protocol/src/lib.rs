//! Message envelope and payload model for cross-context method calls.
//!
//! This is the leaf layer of ctxbridge. It defines:
//! - [`Value`], the dynamic payload carried in call arguments and results
//! - [`Message`], the wire envelope, and [`check_message`], its validator
//! - [`extract_transfer`], which finds zero-copy-eligible leaves in a payload
//!
//! Nothing here performs I/O.

pub mod error;
pub mod extract;
pub mod function;
pub mod message;
pub mod transfer;
pub mod value;

pub use error::{ProtocolError, Result};
pub use extract::{extract_message, extract_transfer, Extracted};
pub use function::Function;
pub use message::{
    check_message, now_millis, validate_message, Message, MessageSender, MessageType, Meta,
};
pub use transfer::{Endpoint, EndpointKind, Transferable};
pub use value::{Array, Object, Value};
