//! Remote method calls between two execution contexts.
//!
//! A *provider* serves a [`Target`] over an
//! [`Adapter`](ctxbridge_adapter::Adapter); an *injector* holds a [`Handle`]
//! whose calls travel over the same channel and resolve with the provider's
//! results. Function arguments become callbacks the provider can invoke
//! remotely, any number of times.
//!
//! Start with [`define_proxy`].

pub mod define;
pub mod error;
pub mod heartbeat;
pub mod injector;
pub mod options;
pub mod provider;
pub mod target;

pub use define::{define_proxy, Inject, Provide};
pub use error::{ProxyError, Result};
pub use heartbeat::heartbeat_check;
pub use injector::{is_proxy, Handle};
pub use options::{Options, DEFAULT_NAMESPACE};
pub use target::{Member, Method, MethodError, MethodResult, Target, TargetBuilder};

/// Fresh correlation token for an exchange or a callback.
pub(crate) fn correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
