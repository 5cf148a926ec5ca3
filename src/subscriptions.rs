//! Fan-out of host and bridge events to interested subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDelivery {
    pub event: String,
    pub payload: Value,
    pub subscription_id: String,
}

/// Destination for deliveries. An `Err` means the sink is gone for good and
/// its subscription is pruned.
pub trait EventSink: Send + Sync {
    fn deliver(&self, delivery: EventDelivery) -> Result<(), SinkClosed>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl EventSink for mpsc::UnboundedSender<EventDelivery> {
    fn deliver(&self, delivery: EventDelivery) -> Result<(), SinkClosed> {
        self.send(delivery).map_err(|_| SinkClosed)
    }
}

struct Subscription {
    event_type: String,
    filter: Option<Map<String, Value>>,
    connection: Option<String>,
    sink: Arc<dyn EventSink>,
}

impl Subscription {
    fn matches(&self, event_type: &str, payload: &Value) -> bool {
        if self.event_type != event_type {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        filter
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }
}

#[derive(Default)]
pub struct EventRegistry {
    subscriptions: Mutex<IndexMap<String, Subscription>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for one event type. A filter keeps only payloads whose
    /// keys equal the filter's; an empty filter matches everything.
    pub fn subscribe(
        &self,
        event_type: &str,
        filter: Option<Map<String, Value>>,
        connection: Option<&str>,
        sink: Arc<dyn EventSink>,
    ) -> String {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscriptions.lock().insert(
            id.clone(),
            Subscription {
                event_type: event_type.to_string(),
                filter: filter.filter(|f| !f.is_empty()),
                connection: connection.map(str::to_string),
                sink,
            },
        );
        debug!(subscription = %id, event_type, "subscribed");
        id
    }

    /// Convenience: subscribe and get a channel receiver back.
    pub fn subscribe_channel(
        &self,
        event_type: &str,
        filter: Option<Map<String, Value>>,
    ) -> (String, mpsc::UnboundedReceiver<EventDelivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(event_type, filter, None, Arc::new(tx));
        (id, rx)
    }

    /// Subscribe one channel to several event types on behalf of
    /// `connection`. Everything it registers goes with
    /// [`EventRegistry::drop_connection`].
    pub fn subscribe_connection(
        &self,
        connection: &str,
        event_types: &[&str],
        filter: Option<Map<String, Value>>,
    ) -> (Vec<String>, mpsc::UnboundedReceiver<EventDelivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        let ids = event_types
            .iter()
            .map(|event_type| self.subscribe(event_type, filter.clone(), Some(connection), Arc::clone(&sink)))
            .collect();
        (ids, rx)
    }

    /// Remove a subscription. Unknown or already removed ids return `false`.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().shift_remove(subscription_id).is_some()
    }

    /// Remove every subscription owned by a torn-down connection.
    pub fn drop_connection(&self, connection: &str) -> usize {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|_, s| s.connection.as_deref() != Some(connection));
        let removed = before - subs.len();
        if removed > 0 {
            debug!(connection, removed, "dropped connection subscriptions");
        }
        removed
    }

    /// Deliver to every matching subscriber. Returns the number of successful
    /// deliveries. Sinks run outside the lock.
    pub fn publish(&self, event_type: &str, payload: &Value) -> usize {
        let targets: Vec<(String, Arc<dyn EventSink>)> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, s)| s.matches(event_type, payload))
            .map(|(id, s)| (id.clone(), Arc::clone(&s.sink)))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sink) in targets {
            let delivery = EventDelivery {
                event: event_type.to_string(),
                payload: payload.clone(),
                subscription_id: id.clone(),
            };
            match sink.deliver(delivery) {
                Ok(()) => delivered += 1,
                Err(SinkClosed) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subs = self.subscriptions.lock();
            for id in &closed {
                warn!(subscription = %id, event_type, "pruning subscription with closed sink");
                subs.shift_remove(id);
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }
}
