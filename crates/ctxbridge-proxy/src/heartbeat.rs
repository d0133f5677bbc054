use std::sync::Arc;

use ctxbridge_adapter::{Adapter, MessageHandler, OffMessage};
use ctxbridge_protocol::{validate_message, Message, MessageSender, MessageType};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::error::{ProxyError, Result};
use crate::options::Options;

/// Ping the provider until it answers or `heartbeat_timeout` elapses.
///
/// A ping goes out immediately and then every `heartbeat_interval`, each with
/// a fresh id and its own pong listener. The first matching pong wins. Every
/// listener registered along the way is removed before this returns, whatever
/// the outcome. The deadline also bounds a ping the adapter never completes.
pub async fn heartbeat_check(adapter: &dyn Adapter, options: &Options) -> Result<()> {
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<String>();
    let mut listeners: Vec<OffMessage> = Vec::new();

    let deadline_at = time::Instant::now() + options.heartbeat_timeout;
    let deadline = time::sleep_until(deadline_at);
    tokio::pin!(deadline);
    let mut ticker = time::interval(options.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;

            Some(id) = pong_rx.recv() => {
                debug!(%id, namespace = %options.namespace, "heartbeat answered");
                break Ok(());
            }
            _ = &mut deadline => break Err(timed_out(options)),
            _ = ticker.tick() => {
                // A stalled adapter must not outlive the deadline.
                let pinging = ping(adapter, options, &pong_tx, &mut listeners);
                match time::timeout_at(deadline_at, pinging).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => break Err(err),
                    Err(_) => break Err(timed_out(options)),
                }
            }
        }
    };

    for off in listeners {
        off().await;
    }
    outcome
}

fn timed_out(options: &Options) -> ProxyError {
    warn!(
        namespace = %options.namespace,
        timeout_ms = options.heartbeat_timeout.as_millis() as u64,
        "heartbeat check timed out"
    );
    ProxyError::HeartbeatTimeout(options.heartbeat_timeout)
}

async fn ping(
    adapter: &dyn Adapter,
    options: &Options,
    pong_tx: &mpsc::UnboundedSender<String>,
    listeners: &mut Vec<OffMessage>,
) -> Result<()> {
    let id = crate::correlation_id();

    let expected = id.clone();
    let namespace = options.namespace.clone();
    let pong_tx = pong_tx.clone();
    let handler: MessageHandler = Arc::new(move |candidate| {
        let Ok(message) = validate_message(candidate.as_ref()) else {
            return;
        };
        if message.message_type == MessageType::Pong
            && message.sender == MessageSender::Provider
            && message.namespace == namespace
            && message.id == expected
        {
            let _ = pong_tx.send(message.id);
        }
    });
    if let Some(off) = adapter.on_message(handler).await? {
        listeners.push(off);
    }

    trace!(%id, namespace = %options.namespace, "sending ping");
    let message = Message::new(
        MessageType::Ping,
        MessageSender::Injector,
        id,
        Vec::new(),
        options.namespace.clone(),
    );
    let transfer = options.transfer_hints(&message);
    adapter.send_message(message, transfer).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ctxbridge_adapter::LoopbackAdapter;
    use ctxbridge_protocol::Value;
    use futures_util::future::{self, BoxFuture, FutureExt};

    use super::*;

    fn options(interval_ms: u64, timeout_ms: u64) -> Options {
        Options::default()
            .with_namespace("heartbeat-test")
            .with_heartbeat_interval(Duration::from_millis(interval_ms))
            .with_heartbeat_timeout(Duration::from_millis(timeout_ms))
    }

    /// Answer every ping on `provider` with a pong built by `reply`.
    async fn answer_pings<F>(provider: &LoopbackAdapter, reply: F)
    where
        F: Fn(&Message) -> Option<Message> + Send + Sync + 'static,
    {
        let responder = provider.clone();
        let handler: MessageHandler = Arc::new(move |candidate: Option<Value>| {
            let Ok(message) = validate_message(candidate.as_ref()) else {
                return;
            };
            if message.message_type != MessageType::Ping {
                return;
            }
            if let Some(pong) = reply(&message) {
                let responder = responder.clone();
                tokio::spawn(async move {
                    responder.send_message(pong, Vec::new()).await.unwrap();
                });
            }
        });
        provider.on_message(handler).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_provider() {
        let adapter = LoopbackAdapter::detached();
        let opts = options(100, 200);

        let started = time::Instant::now();
        let err = heartbeat_check(&adapter, &opts).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ProxyError::HeartbeatTimeout(_)));
        assert!(err.to_string().contains("200ms"));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
        // pings at 0ms and 100ms; the 200ms tick loses to the deadline
        assert_eq!(adapter.sent().len(), 2);
        assert_eq!(adapter.handler_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_matching_pong() {
        let (injector, provider) = LoopbackAdapter::pair();
        answer_pings(&provider, |ping| {
            Some(Message::reply_to(
                ping,
                MessageType::Pong,
                MessageSender::Provider,
            ))
        })
        .await;

        heartbeat_check(&injector, &options(100, 200)).await.unwrap();
        assert_eq!(injector.handler_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_pong_from_other_namespace() {
        let (injector, provider) = LoopbackAdapter::pair();
        answer_pings(&provider, |ping| {
            let mut pong = Message::reply_to(ping, MessageType::Pong, MessageSender::Provider);
            pong.namespace = "elsewhere".to_string();
            Some(pong)
        })
        .await;

        let err = heartbeat_check(&injector, &options(100, 200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::HeartbeatTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_pong_from_injector_sender() {
        let (injector, provider) = LoopbackAdapter::pair();
        answer_pings(&provider, |ping| {
            Some(Message::reply_to(
                ping,
                MessageType::Pong,
                MessageSender::Injector,
            ))
        })
        .await;

        let err = heartbeat_check(&injector, &options(50, 120))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::HeartbeatTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_pong_with_other_id() {
        let (injector, provider) = LoopbackAdapter::pair();
        answer_pings(&provider, |ping| {
            let mut pong = Message::reply_to(ping, MessageType::Pong, MessageSender::Provider);
            pong.id.push_str("-other");
            Some(pong)
        })
        .await;

        let err = heartbeat_check(&injector, &options(50, 120))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::HeartbeatTimeout(_)));
    }

    /// Accepts handlers but never completes a send.
    struct StalledAdapter;

    impl Adapter for StalledAdapter {
        fn send_message(
            &self,
            _message: Message,
            _transfer: Vec<ctxbridge_protocol::Transferable>,
        ) -> BoxFuture<'_, ctxbridge_adapter::Result<()>> {
            future::pending().boxed()
        }

        fn on_message(
            &self,
            _handler: MessageHandler,
        ) -> BoxFuture<'_, ctxbridge_adapter::Result<Option<OffMessage>>> {
            future::ready(Ok(None)).boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_still_times_out() {
        let started = time::Instant::now();
        let outcome = time::timeout(
            Duration::from_secs(5),
            heartbeat_check(&StalledAdapter, &options(100, 200)),
        )
        .await
        .expect("heartbeat check should settle at its deadline");

        assert!(matches!(outcome, Err(ProxyError::HeartbeatTimeout(_))));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_failure_fails_check() {
        let adapter = LoopbackAdapter::detached();
        adapter.close();

        let err = heartbeat_check(&adapter, &options(100, 200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Adapter(_)));
    }
}
