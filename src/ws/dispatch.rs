//! Subscription bookkeeping and event fan-out
//!
//! Decoded events travel on a bounded channel drained by the dispatcher
//! task. The channel blocks the producer when full; per-pair causal ordering
//! is an invariant downstream code relies on, so events are never dropped.
//! A failing callback is contained and logged and never aborts the
//! dispatcher or the other callbacks.

use crate::ws::events::{Channel, MarketEvent, SubscribeFrame};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, trace};

/// Identifies what must be (re)subscribed after a reconnect: channel, the
/// ordered pair list, and the optional depth/interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub channel: Channel,
    pub pairs: Vec<String>,
    pub detail: Option<u32>,
}

impl SubscriptionKey {
    pub fn new(channel: Channel, pairs: Vec<String>, detail: Option<u32>) -> Self {
        Self {
            channel,
            pairs,
            detail,
        }
    }

    pub fn ticker(pairs: Vec<String>) -> Self {
        Self::new(Channel::Ticker, pairs, None)
    }

    pub fn trade(pairs: Vec<String>) -> Self {
        Self::new(Channel::Trade, pairs, None)
    }

    pub fn book(pairs: Vec<String>, depth: u32) -> Self {
        Self::new(Channel::Book, pairs, Some(depth))
    }

    pub fn ohlc(pairs: Vec<String>, interval: u32) -> Self {
        Self::new(Channel::Ohlc, pairs, Some(interval))
    }

    pub fn subscribe_frame(&self) -> SubscribeFrame {
        SubscribeFrame::subscribe(self.channel, self.pairs.clone(), self.detail)
    }

    pub fn unsubscribe_frame(&self) -> SubscribeFrame {
        SubscribeFrame::unsubscribe(self.channel, self.pairs.clone(), self.detail)
    }

    /// Whether a decoded event belongs to this subscription.
    pub fn matches(&self, event: &MarketEvent) -> bool {
        self.channel == event.channel()
            && self.detail == event.detail()
            && self.pairs.iter().any(|p| p == event.pair())
    }
}

/// Async callback invoked for every matching event
pub type EventCallback =
    Arc<dyn Fn(MarketEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Subscription key -> ordered callback list. Independent of the connection
/// lifecycle: reconnects re-send subscribe frames but never touch this.
pub struct CallbackRegistry {
    callbacks: Mutex<HashMap<SubscriptionKey, Vec<EventCallback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, key: SubscriptionKey, callback: EventCallback) {
        let mut callbacks = self.callbacks.lock().await;
        callbacks.entry(key).or_default().push(callback);
    }

    pub async fn remove(&self, key: &SubscriptionKey) {
        let mut callbacks = self.callbacks.lock().await;
        callbacks.remove(key);
    }

    pub async fn callback_count(&self, key: &SubscriptionKey) -> usize {
        let callbacks = self.callbacks.lock().await;
        callbacks.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Callbacks whose key matches the event, in registration order.
    async fn matching(&self, event: &MarketEvent) -> Vec<EventCallback> {
        let callbacks = self.callbacks.lock().await;
        callbacks
            .iter()
            .filter(|(key, _)| key.matches(event))
            .flat_map(|(_, list)| list.iter().cloned())
            .collect()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain the bounded event channel and invoke matching callbacks until the
/// channel closes. Runs as the session's callback-processor task;
/// `queue_depth` mirrors how many events are waiting in the channel.
pub async fn run_dispatcher(
    mut event_rx: mpsc::Receiver<MarketEvent>,
    registry: Arc<CallbackRegistry>,
    queue_depth: Arc<std::sync::atomic::AtomicUsize>,
) {
    debug!("callback dispatcher started");
    while let Some(event) = event_rx.recv().await {
        let _ = queue_depth.fetch_update(
            std::sync::atomic::Ordering::Relaxed,
            std::sync::atomic::Ordering::Relaxed,
            |depth| Some(depth.saturating_sub(1)),
        );
        let callbacks = registry.matching(&event).await;
        if callbacks.is_empty() {
            trace!(pair = %event.pair(), channel = %event.channel(), "no subscribers");
            continue;
        }

        for callback in callbacks {
            let fut = callback(event.clone());
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(pair = %event.pair(), %err, "subscriber callback failed");
                }
                Err(_) => {
                    error!(pair = %event.pair(), "subscriber callback panicked");
                }
            }
        }
    }
    debug!("callback dispatcher stopped");
}
