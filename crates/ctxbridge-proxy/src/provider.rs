use std::collections::HashSet;
use std::sync::Arc;

use ctxbridge_adapter::{Adapter, MessageHandler};
use ctxbridge_protocol::{validate_message, Function, Message, MessageSender, MessageType, Value};
use tokio::runtime::Handle as Runtime;
use tracing::{debug, trace, warn};

use crate::error::{ProxyError, Result};
use crate::options::Options;
use crate::target::Target;

/// Answers pings and applies calls against one target.
struct Dispatcher {
    runtime: Runtime,
    adapter: Arc<dyn Adapter>,
    options: Options,
    target: Target,
}

/// Register the provider's inbound handler on `adapter`.
///
/// Each addressed message is dispatched on its own task, so a slow method
/// never holds up other calls or liveness probes.
pub(crate) async fn bind(adapter: Arc<dyn Adapter>, options: Options, target: Target) -> Result<()> {
    let runtime = Runtime::try_current().map_err(|err| ProxyError::NoRuntime(err.to_string()))?;
    let namespace = options.namespace.clone();
    let dispatcher = Arc::new(Dispatcher {
        runtime: runtime.clone(),
        adapter: adapter.clone(),
        options,
        target,
    });

    let handler: MessageHandler = Arc::new(move |candidate| {
        let message = match validate_message(candidate.as_ref()) {
            Ok(message) => message,
            Err(err) => {
                trace!(error = %err, "ignoring inbound value");
                return;
            }
        };
        if message.namespace != dispatcher.options.namespace
            || message.sender == MessageSender::Provider
        {
            return;
        }

        let dispatcher = dispatcher.clone();
        runtime.spawn(async move { dispatcher.dispatch(message).await });
    });

    // The provider listens for the life of the channel.
    let _ = adapter.on_message(handler).await?;
    debug!(namespace = %namespace, "provider bound");
    Ok(())
}

impl Dispatcher {
    async fn dispatch(&self, message: Message) {
        match message.message_type {
            MessageType::Ping => {
                let pong = Message::reply_to(&message, MessageType::Pong, MessageSender::Provider);
                self.send(pong).await;
            }
            MessageType::Apply => self.apply(message).await,
            MessageType::Callback | MessageType::Pong => {}
        }
    }

    async fn apply(&self, message: Message) {
        let callback_ids: HashSet<&str> = message
            .callback_ids
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();

        let args = message
            .args
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|arg| match arg {
                Value::String(token) if callback_ids.contains(token.as_str()) => {
                    Value::Function(self.callback_stub(&message, token))
                }
                other => other,
            })
            .collect();

        trace!(
            id = %message.id,
            path = %message.path_display(),
            callbacks = callback_ids.len(),
            "applying"
        );
        let outcome = self.target.invoke(&message.path, args).await;

        let reply = Message::reply_to(&message, MessageType::Apply, MessageSender::Provider);
        let reply = match outcome {
            Ok(data) => reply.with_data(data),
            Err(err) => {
                debug!(id = %message.id, path = %message.path_display(), error = %err, "apply failed");
                reply.with_error(err.to_string())
            }
        };
        self.send(reply).await;
    }

    /// A function that forwards its arguments to the injector as a CALLBACK
    /// for `token`, carrying the originating call's path and meta.
    ///
    /// The send starts as soon as the stub is called. Awaiting the returned
    /// future only waits for it to finish.
    fn callback_stub(&self, apply: &Message, token: String) -> Function {
        let runtime = self.runtime.clone();
        let adapter = self.adapter.clone();
        let options = self.options.clone();
        let path = apply.path.clone();
        let meta = apply.meta.clone();

        Function::new_async(move |args| {
            let adapter = adapter.clone();
            let message = Message::new(
                MessageType::Callback,
                MessageSender::Provider,
                token.clone(),
                path.clone(),
                options.namespace.clone(),
            )
            .with_data(Value::from(args))
            .with_meta(meta.clone());
            let transfer = options.transfer_hints(&message);

            let sending = runtime.spawn(async move {
                let id = message.id.clone();
                if let Err(err) = adapter.send_message(message, transfer).await {
                    warn!(token = %id, error = %err, "failed to send callback");
                }
            });
            async move {
                let _ = sending.await;
            }
        })
    }

    async fn send(&self, message: Message) {
        let kind = message.message_type;
        let id = message.id.clone();
        let transfer = self.options.transfer_hints(&message);
        if let Err(err) = self.adapter.send_message(message, transfer).await {
            warn!(%kind, %id, error = %err, "failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ctxbridge_adapter::LoopbackAdapter;

    use super::*;
    use crate::target::MethodError;

    async fn bound(target: Target) -> (LoopbackAdapter, LoopbackAdapter) {
        let (injector, provider) = LoopbackAdapter::pair();
        bind(
            Arc::new(provider.clone()),
            Options::default().with_namespace("provider-test"),
            target,
        )
        .await
        .unwrap();
        (injector, provider)
    }

    fn request(message_type: MessageType, id: &str, path: &[&str]) -> Message {
        Message::new(
            message_type,
            MessageSender::Injector,
            id,
            path.iter().map(|name| name.to_string()).collect(),
            "provider-test",
        )
    }

    async fn replies(provider: &LoopbackAdapter, count: usize) -> Vec<Message> {
        for _ in 0..100 {
            let sent = provider.sent();
            if sent.len() >= count {
                return sent.into_iter().map(|sent| sent.message).collect();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {count} replies, got {}", provider.sent().len());
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (injector, provider) = bound(Target::empty()).await;
        injector
            .send_message(request(MessageType::Ping, "p-1", &[]), Vec::new())
            .await
            .unwrap();

        let replies = replies(&provider, 1).await;
        assert_eq!(replies[0].message_type, MessageType::Pong);
        assert_eq!(replies[0].id, "p-1");
        assert_eq!(replies[0].sender, MessageSender::Provider);
    }

    #[tokio::test]
    async fn test_apply_error_reported_as_text() {
        let (injector, provider) = bound(Target::empty()).await;
        injector
            .send_message(request(MessageType::Apply, "a-1", &["missing"]), Vec::new())
            .await
            .unwrap();

        let replies = replies(&provider, 1).await;
        assert_eq!(replies[0].message_type, MessageType::Apply);
        assert_eq!(replies[0].error.as_deref(), Some("member not found: missing"));
        assert!(replies[0].data.is_none());
    }

    #[tokio::test]
    async fn test_ignores_foreign_and_own_messages() {
        let (injector, provider) = bound(Target::empty()).await;

        let mut foreign = request(MessageType::Ping, "p-1", &[]);
        foreign.namespace = "other".to_string();
        injector.send_message(foreign, Vec::new()).await.unwrap();

        let mut own = request(MessageType::Ping, "p-2", &[]);
        own.sender = MessageSender::Provider;
        injector.send_message(own, Vec::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn test_callback_placeholder_becomes_stub() {
        let target = Target::builder()
            .method("each", |args: Vec<Value>| async move {
                let callback = args
                    .first()
                    .and_then(Value::as_function)
                    .cloned()
                    .ok_or("expected a callback")?;
                callback.call(vec![Value::from(1), Value::from(2)]).await;
                Ok::<_, MethodError>(Value::Null)
            })
            .build();
        let (injector, provider) = bound(target).await;

        let mut meta = ctxbridge_protocol::Meta::new();
        meta.insert("frame".to_string(), Value::from(3));
        let apply = request(MessageType::Apply, "a-1", &["each"])
            .with_args(vec![Value::from("cb-1")])
            .with_callback_ids(vec!["cb-1".to_string()])
            .with_meta(meta.clone());
        injector.send_message(apply, Vec::new()).await.unwrap();

        let replies = replies(&provider, 2).await;
        let callback = &replies[0];
        assert_eq!(callback.message_type, MessageType::Callback);
        assert_eq!(callback.id, "cb-1");
        assert_eq!(callback.path, vec!["each".to_string()]);
        assert_eq!(callback.meta, meta);
        assert_eq!(callback.data, Some(Value::array([1, 2])));

        let reply = &replies[1];
        assert_eq!(reply.message_type, MessageType::Apply);
        assert_eq!(reply.id, "a-1");
        assert_eq!(reply.data, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_sync_method_fires_callback_without_awaiting() {
        let target = Target::builder()
            .sync_method("on_change", |args| {
                if let Some(callback) = args.first().and_then(Value::as_function) {
                    drop(callback.call(vec![Value::from(100)]));
                }
                Ok(Value::Null)
            })
            .build();
        let (injector, provider) = bound(target).await;

        let apply = request(MessageType::Apply, "a-1", &["on_change"])
            .with_args(vec![Value::from("cb-1")])
            .with_callback_ids(vec!["cb-1".to_string()]);
        injector.send_message(apply, Vec::new()).await.unwrap();

        let replies = replies(&provider, 2).await;
        let callback = replies
            .iter()
            .find(|sent| sent.message_type == MessageType::Callback)
            .expect("callback should be sent");
        assert_eq!(callback.id, "cb-1");
        assert_eq!(callback.data, Some(Value::array([100])));
        assert!(replies
            .iter()
            .any(|sent| sent.message_type == MessageType::Apply && sent.id == "a-1"));
    }
}
