//! Channel adapter contract for ctxbridge.
//!
//! A transport plugs into ctxbridge by implementing [`Adapter`]: one
//! operation to emit a [`Message`](ctxbridge_protocol::Message), one to
//! register an inbound handler. Worker messaging, extension runtimes and
//! cross-document channels all reduce to these two calls.
//!
//! [`LoopbackAdapter`] connects two adapters in memory for tests and local
//! tooling.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{AdapterError, Result};
pub use memory::{LoopbackAdapter, SentMessage, SENT_LOG_CAPACITY};
pub use traits::{off_message, Adapter, MessageHandler, OffMessage};
