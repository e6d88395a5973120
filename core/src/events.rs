//! EventBus - synchronous named-topic publish/subscribe.
//!
//! Every run owns one bus. The stepper emits `step` on it, the controller
//! emits `start` and `end`, and both the host and the running program
//! subscribe to it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::controller::RunState;

/* ===================== Topics & Events ===================== */

/// Named topic a listener subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Start,
    Step,
    End,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Start => "start",
            Topic::Step => "step",
            Topic::End => "end",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Topic::Start),
            "step" => Ok(Topic::Step),
            "end" => Ok(Topic::End),
            other => Err(format!("Unknown event topic '{}'", other)),
        }
    }
}

/// Timing payload carried by every `step` event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInfo {
    /// Zero-based index of the step within the run
    pub index: u64,
    /// Delay requested for this step, if any
    pub delay_ms: Option<u64>,
    /// Wall-clock time the step was reached
    pub at: DateTime<Utc>,
}

/// An event delivered to listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", content = "payload", rename_all = "lowercase")]
pub enum Event {
    Start,
    Step(StepInfo),
    End(RunState),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Start => Topic::Start,
            Event::Step(_) => Topic::Step,
            Event::End(_) => Topic::End,
        }
    }
}

/* ===================== Listeners ===================== */

/// Listener callback
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifier of a registered listener, unique within one bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

struct Listener {
    id: ListenerId,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct BusInner {
    listeners: HashMap<Topic, Vec<Listener>>,
    next_id: u64,
    destroyed: bool,
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/* ===================== EventBus ===================== */

/// In-process event bus with synchronous, ordered delivery
///
/// Cloning the bus yields another handle to the same listener table.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler for every emission of `topic`
    pub fn on<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(topic, Arc::new(handler), false)
    }

    /// Subscribe a handler for the next emission of `topic` only
    pub fn once<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(topic, Arc::new(handler), true)
    }

    /// Subscribe an already shared handler
    pub fn subscribe(&self, topic: Topic, handler: Handler, once: bool) -> Subscription {
        let mut inner = lock(&self.inner);

        inner.next_id += 1;
        let id = ListenerId(inner.next_id);

        // A destroyed bus hands out inert subscriptions
        if !inner.destroyed {
            inner
                .listeners
                .entry(topic)
                .or_default()
                .push(Listener { id, handler, once });
        }

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn off(&self, topic: Topic, id: ListenerId) -> bool {
        remove_listener(&self.inner, topic, id)
    }

    /// Deliver an event to the listeners of its topic, in subscription order
    ///
    /// Delivery iterates over a snapshot, so handlers may subscribe or
    /// unsubscribe while the emit is in progress.
    pub fn emit(&self, event: &Event) {
        let topic = event.topic();
        let handlers: Vec<Handler> = {
            let mut inner = lock(&self.inner);
            if inner.destroyed {
                return;
            }
            let Some(listeners) = inner.listeners.get_mut(&topic) else {
                return;
            };
            let snapshot = listeners.iter().map(|l| l.handler.clone()).collect();
            // Once-listeners leave before they run so re-entrant emits skip them
            listeners.retain(|l| !l.once);
            snapshot
        };

        for handler in handlers {
            handler(event);
        }
    }

    /// Remove every listener and ignore all further emits
    pub fn destroy(&self) {
        let mut inner = lock(&self.inner);
        inner.destroyed = true;
        inner.listeners.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner).destroyed
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        lock(&self.inner)
            .listeners
            .get(&topic)
            .map_or(0, Vec::len)
    }

    pub fn total_listeners(&self) -> usize {
        lock(&self.inner).listeners.values().map(Vec::len).sum()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("EventBus")
            .field("listeners", &inner.listeners.values().map(Vec::len).sum::<usize>())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

fn remove_listener(inner: &Mutex<BusInner>, topic: Topic, id: ListenerId) -> bool {
    let mut inner = lock(inner);
    let Some(listeners) = inner.listeners.get_mut(&topic) else {
        return false;
    };
    let before = listeners.len();
    listeners.retain(|l| l.id != id);
    before != listeners.len()
}

/* ===================== Subscription ===================== */

/// Handle returned by `on`/`once`
///
/// Dropping the handle keeps the listener registered; call `unsubscribe`
/// to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    topic: Topic,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the listener. Returns whether it was still registered.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => remove_listener(&inner, self.topic, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |name: &'static str| -> Handler {
                let log = log.clone();
                Arc::new(move |event: &Event| {
                    log.lock().unwrap().push(format!("{}:{}", name, event.topic()));
                })
            }
        };
        (log, make)
    }

    #[test]
    fn test_handlers_fire_in_subscription_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        bus.subscribe(Topic::Start, make("a"), false);
        bus.subscribe(Topic::Start, make("b"), false);
        bus.subscribe(Topic::End, make("c"), false);

        bus.emit(&Event::Start);

        assert_eq!(*log.lock().unwrap(), vec!["a:start", "b:start"]);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.once(Topic::Start, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::Start);
        bus.emit(&Event::Start);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(Topic::Start), 0);
    }

    #[test]
    fn test_once_does_not_rerun_on_reentrant_emit() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let inner_bus = bus.clone();
        bus.once(Topic::Start, move |event| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner_bus.emit(event);
        });

        bus.emit(&Event::Start);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_off() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let first = bus.subscribe(Topic::Start, make("a"), false);
        let second = bus.subscribe(Topic::Start, make("b"), false);

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert!(bus.off(Topic::Start, second.id()));
        assert!(!bus.off(Topic::Start, second.id()));

        bus.emit(&Event::Start);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_may_unsubscribe_itself_during_emit() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let counter = hits.clone();
        let own = slot.clone();
        let sub = bus.on(Topic::Start, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = own.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(&Event::Start);
        bus.emit(&Event::Start);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroyed_bus_is_silent() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(Topic::Start, make("a"), false);

        bus.destroy();
        bus.emit(&Event::Start);
        let late = bus.subscribe(Topic::Start, make("late"), false);
        bus.emit(&Event::Start);

        assert!(bus.is_destroyed());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.total_listeners(), 0);
        assert!(!late.unsubscribe());
    }

    #[test]
    fn test_topic_parses_from_name() {
        assert_eq!("step".parse::<Topic>(), Ok(Topic::Step));
        assert!("tick".parse::<Topic>().is_err());
    }
}
