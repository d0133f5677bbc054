use std::sync::Arc;

use ctxbridge_protocol::{Message, Transferable, Value};
use futures_util::future::{self, BoxFuture, FutureExt};

use crate::error::Result;

/// Inbound handler. Receives whatever the transport produced, which may be
/// absent or not a message at all; callers validate before trusting it.
pub type MessageHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Deregisters a handler previously passed to [`Adapter::on_message`].
pub type OffMessage = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Wrap a synchronous deregistration closure as an [`OffMessage`].
pub fn off_message<F>(off: F) -> OffMessage
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        off();
        future::ready(()).boxed()
    })
}

/// The two-operation channel contract between provider and injector.
///
/// Implementations own everything transport-specific: serialization,
/// addressing, and how `transfer` hints are honored. Delivery order across
/// independent messages is not assumed.
pub trait Adapter: Send + Sync {
    /// Emit a message. `transfer` lists payload leaves the transport may move
    /// instead of copy; it is empty when transfer extraction is disabled.
    fn send_message(&self, message: Message, transfer: Vec<Transferable>)
        -> BoxFuture<'_, Result<()>>;

    /// Register an inbound handler. Returns a deregistration function when
    /// the transport supports removing handlers.
    fn on_message(&self, handler: MessageHandler) -> BoxFuture<'_, Result<Option<OffMessage>>>;
}

impl<A: Adapter + ?Sized> Adapter for Arc<A> {
    fn send_message(
        &self,
        message: Message,
        transfer: Vec<Transferable>,
    ) -> BoxFuture<'_, Result<()>> {
        (**self).send_message(message, transfer)
    }

    fn on_message(&self, handler: MessageHandler) -> BoxFuture<'_, Result<Option<OffMessage>>> {
        (**self).on_message(handler)
    }
}
