use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use ctxbridge_adapter::{Adapter, MessageHandler};
use ctxbridge_protocol::{
    validate_message, Function, Message, MessageSender, MessageType, Meta, Value,
};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle as Runtime;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{ProxyError, Result};
use crate::heartbeat::heartbeat_check;
use crate::options::Options;
use crate::target::Target;

/// Provenance marker. Only this module can construct it, so only
/// [`Handle`] values carry it.
#[derive(Clone, Copy)]
struct ProxyMarker;

struct Shared {
    adapter: Arc<dyn Adapter>,
    options: Options,
    snapshot: Option<Target>,
}

/// Injector-side stand-in for the provider's target.
///
/// [`Handle::member`] and [`Handle::path`] only extend the path;
/// [`Handle::call`] is the single operation that talks to the provider.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
    path: Vec<String>,
    meta: Meta,
    _marker: ProxyMarker,
}

impl Handle {
    pub(crate) fn new(adapter: Arc<dyn Adapter>, options: Options, snapshot: Option<Target>) -> Self {
        Self {
            shared: Arc::new(Shared {
                adapter,
                options,
                snapshot,
            }),
            path: Vec::new(),
            meta: Meta::new(),
            _marker: ProxyMarker,
        }
    }

    /// A handle one member deeper. No I/O.
    pub fn member(&self, name: impl Into<String>) -> Handle {
        let mut next = self.clone();
        next.path.push(name.into());
        next
    }

    /// A handle several members deeper. No I/O.
    pub fn path<I, S>(&self, names: I) -> Handle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.path.extend(names.into_iter().map(Into::into));
        next
    }

    /// Member names accumulated so far.
    pub fn segments(&self) -> &[String] {
        &self.path
    }

    /// Attach transport context to calls made through this handle.
    pub fn with_meta(&self, meta: Meta) -> Handle {
        let mut next = self.clone();
        next.meta = meta;
        next
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Local membership query against the backup snapshot. Always `false`
    /// without backup; the snapshot is never invoked.
    pub fn has(&self, name: &str) -> bool {
        let Some(snapshot) = &self.shared.snapshot else {
            return false;
        };
        let mut path = self.path.clone();
        path.push(name.to_string());
        snapshot.contains(&path)
    }

    /// Invoke the remote member at this handle's path.
    ///
    /// Function arguments are replaced by callback tokens; the provider calls
    /// back through the channel whenever it invokes them. Resolves with the
    /// remote result, `Value::Null` when the method returned nothing.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        if self.path.is_empty() {
            return Err(ProxyError::EmptyPath);
        }

        let adapter = self.shared.adapter.as_ref();
        let options = &self.shared.options;

        if options.heartbeat_check {
            heartbeat_check(adapter, options).await?;
        }

        let mut callback_ids = Vec::new();
        let mut marshalled = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Function(function) => {
                    let token = crate::correlation_id();
                    self.register_callback(token.clone(), function).await?;
                    callback_ids.push(token.clone());
                    marshalled.push(Value::String(token));
                }
                other => marshalled.push(other),
            }
        }

        let id = crate::correlation_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        let off = adapter
            .on_message(reply_listener(id.clone(), options.namespace.clone(), reply_tx))
            .await?;

        let message = Message::new(
            MessageType::Apply,
            MessageSender::Injector,
            id.clone(),
            self.path.clone(),
            options.namespace.clone(),
        )
        .with_args(marshalled)
        .with_callback_ids(callback_ids)
        .with_meta(self.meta.clone());

        debug!(
            %id,
            namespace = %options.namespace,
            path = %message.path_display(),
            "sending apply"
        );
        let transfer = options.transfer_hints(&message);
        let sent = adapter.send_message(message, transfer).await;

        let reply = match sent {
            Ok(()) => reply_rx.await.map_err(|_| ProxyError::ChannelClosed),
            Err(err) => Err(err.into()),
        };
        if let Some(off) = off {
            off().await;
        }

        let reply = reply?;
        match reply.error {
            Some(error) => {
                debug!(%id, %error, "remote call failed");
                Err(ProxyError::Remote(error))
            }
            None => Ok(reply.data.unwrap_or_default()),
        }
    }

    /// [`Handle::call`], then deserialize the result.
    pub async fn call_as<T: DeserializeOwned>(&self, args: Vec<Value>) -> Result<T> {
        let value = self.call(args).await?;
        Ok(value.deserialize_into()?)
    }

    /// Listen for CALLBACK messages addressed to `token` and run `function`
    /// for each. The listener stays registered for the life of the channel.
    async fn register_callback(&self, token: String, function: Function) -> Result<()> {
        let runtime =
            Runtime::try_current().map_err(|err| ProxyError::NoRuntime(err.to_string()))?;
        let namespace = self.shared.options.namespace.clone();

        let handler: MessageHandler = Arc::new(move |candidate| {
            let Ok(message) = validate_message(candidate.as_ref()) else {
                return;
            };
            if message.message_type != MessageType::Callback
                || message.sender != MessageSender::Provider
                || message.namespace != namespace
                || message.id != token
            {
                return;
            }

            let args = match message.data {
                Some(Value::Array(array)) => array.to_vec(),
                Some(other) => vec![other],
                None => Vec::new(),
            };
            trace!(token = %message.id, args = args.len(), "invoking callback");
            runtime.spawn(function.call(args));
        });

        if self.shared.adapter.on_message(handler).await?.is_none() {
            trace!("adapter returned no deregistration for callback listener");
        }
        Ok(())
    }
}

fn reply_listener(
    id: String,
    namespace: String,
    reply_tx: oneshot::Sender<Message>,
) -> MessageHandler {
    let slot = Mutex::new(Some(reply_tx));
    Arc::new(move |candidate| {
        let Ok(message) = validate_message(candidate.as_ref()) else {
            return;
        };
        if message.message_type != MessageType::Apply
            || message.sender != MessageSender::Provider
            || message.namespace != namespace
            || message.id != id
        {
            return;
        }

        let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            Some(sender) => {
                let _ = sender.send(message);
            }
            None => warn!(%id, "duplicate apply reply ignored"),
        }
    })
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("path", &self.path)
            .field("namespace", &self.shared.options.namespace)
            .field("backup", &self.shared.snapshot.is_some())
            .finish()
    }
}

/// True exactly for values produced by an injector.
pub fn is_proxy(value: &dyn Any) -> bool {
    value.downcast_ref::<Handle>().is_some()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ctxbridge_adapter::LoopbackAdapter;

    use super::*;

    fn handle(adapter: LoopbackAdapter, options: Options, snapshot: Option<Target>) -> Handle {
        Handle::new(Arc::new(adapter), options, snapshot)
    }

    fn no_heartbeat() -> Options {
        Options::default().with_heartbeat_check(false)
    }

    #[test]
    fn test_member_extends_path_without_io() {
        let adapter = LoopbackAdapter::detached();
        let root = handle(adapter.clone(), no_heartbeat(), None);
        let deep = root.member("a").path(["b", "c"]);

        assert_eq!(deep.segments(), ["a", "b", "c"]);
        assert!(root.segments().is_empty());
        assert!(adapter.sent().is_empty());
        assert_eq!(adapter.handler_count(), 0);
    }

    #[test]
    fn test_has_requires_backup() {
        let snapshot = Target::builder()
            .sync_method("greet", |_| Ok(Value::Null))
            .object(
                "nested",
                Target::builder()
                    .sync_method("inner", |_| Ok(Value::Null))
                    .build(),
            )
            .build();

        let with_backup = handle(
            LoopbackAdapter::detached(),
            no_heartbeat().with_backup(true),
            Some(snapshot),
        );
        assert!(with_backup.has("greet"));
        assert!(!with_backup.has("missing"));
        assert!(with_backup.member("nested").has("inner"));

        let without = handle(LoopbackAdapter::detached(), no_heartbeat(), None);
        assert!(!without.has("greet"));
    }

    #[tokio::test]
    async fn test_call_on_root_is_rejected() {
        let adapter = LoopbackAdapter::detached();
        let root = handle(adapter.clone(), no_heartbeat(), None);
        assert!(matches!(
            root.call(Vec::new()).await,
            Err(ProxyError::EmptyPath)
        ));
        assert!(adapter.sent().is_empty());
    }

    #[tokio::test]
    async fn test_apply_envelope_marshals_callbacks() {
        let adapter = LoopbackAdapter::detached();
        let target = handle(adapter.clone(), no_heartbeat(), None).member("subscribe");

        let call = tokio::spawn({
            let target = target.clone();
            async move {
                target
                    .call(vec![Value::from("topic"), Value::from(Function::new(|_| {}))])
                    .await
            }
        });

        // no provider: wait until the apply has been recorded, then abandon it
        let sent = loop {
            let sent = adapter.sent();
            if !sent.is_empty() {
                break sent;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        call.abort();

        let apply = &sent[0].message;
        assert_eq!(apply.message_type, MessageType::Apply);
        assert_eq!(apply.sender, MessageSender::Injector);
        assert_eq!(apply.path, vec!["subscribe".to_string()]);

        let callback_ids = apply.callback_ids.clone().unwrap();
        assert_eq!(callback_ids.len(), 1);
        let args = apply.args.clone().unwrap();
        assert_eq!(args[0], Value::from("topic"));
        assert_eq!(args[1], Value::from(callback_ids[0].as_str()));
    }

    /// Wait until `adapter` has recorded an APPLY and return it.
    async fn sent_apply(adapter: &LoopbackAdapter) -> Message {
        loop {
            if let Some(sent) = adapter
                .sent()
                .into_iter()
                .find(|sent| sent.message.message_type == MessageType::Apply)
            {
                return sent.message;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Variants of `reply` that break one addressing rule each.
    fn misaddressed(reply: &Message) -> Vec<Message> {
        let mut foreign = reply.clone();
        foreign.namespace = "elsewhere".to_string();
        let mut own = reply.clone();
        own.sender = MessageSender::Injector;
        let mut other_id = reply.clone();
        other_id.id.push_str("-other");
        vec![foreign, own, other_id]
    }

    #[tokio::test]
    async fn test_reply_listener_ignores_misaddressed_replies() {
        let (injector, provider) = LoopbackAdapter::pair();
        let target = handle(injector.clone(), no_heartbeat(), None).member("read");
        let call = tokio::spawn(async move { target.call(Vec::new()).await });

        let apply = sent_apply(&injector).await;
        let reply = Message::reply_to(&apply, MessageType::Apply, MessageSender::Provider)
            .with_data(Value::from("answer"));
        for wrong in misaddressed(&reply) {
            provider.send_message(wrong, Vec::new()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!call.is_finished());

        provider.send_message(reply, Vec::new()).await.unwrap();
        assert_eq!(call.await.unwrap().unwrap(), Value::from("answer"));
    }

    #[tokio::test]
    async fn test_callback_listener_ignores_misaddressed_callbacks() {
        let (injector, provider) = LoopbackAdapter::pair();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = Function::new(move |args| {
            let _ = tx.send(args);
        });
        let target = handle(injector.clone(), no_heartbeat(), None).member("watch");
        let _call = tokio::spawn(async move { target.call(vec![Value::from(listener)]).await });

        let apply = sent_apply(&injector).await;
        let token = apply.callback_ids.clone().unwrap().remove(0);
        let callback = Message::new(
            MessageType::Callback,
            MessageSender::Provider,
            token,
            apply.path.clone(),
            apply.namespace.clone(),
        )
        .with_data(Value::array([7]));
        for wrong in misaddressed(&callback) {
            provider.send_message(wrong, Vec::new()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        provider.send_message(callback, Vec::new()).await.unwrap();
        let args = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(args, vec![Value::from(7)]);
    }

    #[tokio::test]
    async fn test_send_failure_fails_call() {
        let adapter = LoopbackAdapter::detached();
        let target = handle(adapter.clone(), no_heartbeat(), None).member("x");
        adapter.close();

        let err = target.call(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Adapter(_)));
    }

    #[test]
    fn test_is_proxy() {
        let root = handle(LoopbackAdapter::detached(), no_heartbeat(), None);
        assert!(is_proxy(&root));
        assert!(is_proxy(&root.member("deep")));
        assert!(!is_proxy(&Value::object([("a", 1)])));
        assert!(!is_proxy(&Target::empty()));
        assert!(!is_proxy(&42));
    }
}
