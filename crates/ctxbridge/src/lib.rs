//! Call methods across execution contexts over any message channel.
//!
//! A provider exposes a target object; an injector calls its methods as if
//! they were local, passing callbacks that the provider may invoke any number
//! of times. The two sides share nothing but an asynchronous channel, which
//! the caller supplies as an [`Adapter`](adapter::Adapter).
//!
//! # Crate Structure
//!
//! - [`protocol`]: message envelope, dynamic values, transfer extraction
//! - [`adapter`]: the channel contract and an in-memory loopback pair
//! - [`proxy`]: provider, injector, heartbeat and `define_proxy`
//!
//! The most used items are also re-exported at the crate root.

/// Re-export protocol types.
pub mod protocol {
    pub use ctxbridge_protocol::*;
}

/// Re-export adapter types.
pub mod adapter {
    pub use ctxbridge_adapter::*;
}

/// Re-export proxy types.
pub mod proxy {
    pub use ctxbridge_proxy::*;
}

pub use ctxbridge_adapter::{Adapter, LoopbackAdapter, MessageHandler, OffMessage};
pub use ctxbridge_protocol::{check_message, Function, Message, Value};
pub use ctxbridge_proxy::{
    define_proxy, is_proxy, Handle, Inject, Options, Provide, ProxyError, Target,
};
