use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ctxbridge_protocol::{extract_message, Message, Transferable};
use futures_util::future::{self, BoxFuture, FutureExt};
use tracing::{debug, trace};

use crate::error::{AdapterError, Result};
use crate::traits::{off_message, Adapter, MessageHandler, OffMessage};

/// How many sent messages each side keeps for [`LoopbackAdapter::sent`].
/// Older entries are dropped first.
pub const SENT_LOG_CAPACITY: usize = 1024;

/// A message captured by [`LoopbackAdapter::sent`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    pub transfer: Vec<Transferable>,
}

#[derive(Default)]
struct Inbox {
    handlers: Mutex<Vec<(u64, MessageHandler)>>,
    next_id: AtomicU64,
}

impl Inbox {
    fn handlers(&self) -> MutexGuard<'_, Vec<(u64, MessageHandler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory adapter. One half of a [`LoopbackAdapter::pair`], or a
/// [`LoopbackAdapter::detached`] sink with no peer.
///
/// A sent message is copied the way a structured-clone transport would copy
/// it and handed to every handler registered on the peer before
/// `send_message` resolves. Handlers must not block.
///
/// Each side also records what it sent, up to [`SENT_LOG_CAPACITY`]
/// messages, for inspection in tests.
#[derive(Clone)]
pub struct LoopbackAdapter {
    name: &'static str,
    local: Arc<Inbox>,
    remote: Option<Arc<Inbox>>,
    sent: Arc<Mutex<VecDeque<SentMessage>>>,
    closed: Arc<AtomicBool>,
}

impl LoopbackAdapter {
    /// Two adapters wired to each other.
    pub fn pair() -> (Self, Self) {
        let left = Arc::new(Inbox::default());
        let right = Arc::new(Inbox::default());
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self::new("left", left.clone(), Some(right.clone()), closed.clone()),
            Self::new("right", right, Some(left), closed),
        )
    }

    /// An adapter without a peer. Sends succeed and are recorded, but
    /// nothing is ever delivered.
    pub fn detached() -> Self {
        Self::new(
            "detached",
            Arc::new(Inbox::default()),
            None,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn new(
        name: &'static str,
        local: Arc<Inbox>,
        remote: Option<Arc<Inbox>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name,
            local,
            remote,
            sent: Arc::new(Mutex::new(VecDeque::new())),
            closed,
        }
    }

    /// The most recent messages sent from this side, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent_log().iter().cloned().collect()
    }

    pub fn clear_sent(&self) {
        self.sent_log().clear();
    }

    /// Number of handlers currently registered on this side.
    pub fn handler_count(&self) -> usize {
        self.local.handlers().len()
    }

    /// Close the channel for both sides of a pair. Later sends and
    /// registrations fail with [`AdapterError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!(side = self.name, "loopback channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn sent_log(&self) -> MutexGuard<'_, VecDeque<SentMessage>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, message: &Message) -> usize {
        let Some(remote) = &self.remote else {
            return 0;
        };

        // Snapshot so handlers may register or deregister while we iterate.
        let handlers: Vec<MessageHandler> = remote
            .handlers()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        let wire = message.to_value();
        for handler in &handlers {
            handler(Some(extract_message(&wire).message));
        }
        handlers.len()
    }
}

impl Adapter for LoopbackAdapter {
    fn send_message(
        &self,
        message: Message,
        transfer: Vec<Transferable>,
    ) -> BoxFuture<'_, Result<()>> {
        if self.is_closed() {
            return future::ready(Err(AdapterError::Closed)).boxed();
        }

        let delivered = self.deliver(&message);
        trace!(
            side = self.name,
            kind = %message.message_type,
            id = %message.id,
            transfer = transfer.len(),
            delivered,
            "loopback send"
        );
        let mut log = self.sent_log();
        if log.len() == SENT_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(SentMessage { message, transfer });
        future::ready(Ok(())).boxed()
    }

    fn on_message(&self, handler: MessageHandler) -> BoxFuture<'_, Result<Option<OffMessage>>> {
        if self.is_closed() {
            return future::ready(Err(AdapterError::Closed)).boxed();
        }

        let id = self.local.next_id.fetch_add(1, Ordering::Relaxed);
        self.local.handlers().push((id, handler));

        let inbox = Arc::downgrade(&self.local);
        let off = off_message(move || {
            if let Some(inbox) = inbox.upgrade() {
                inbox.handlers().retain(|(registered, _)| *registered != id);
            }
        });
        future::ready(Ok(Some(off))).boxed()
    }
}

impl std::fmt::Debug for LoopbackAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackAdapter")
            .field("side", &self.name)
            .field("handlers", &self.handler_count())
            .field("connected", &self.remote.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}
