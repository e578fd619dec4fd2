//! In-process publish/subscribe keyed by message type.
//!
//! Handlers run synchronously, in subscription order, on the thread that
//! publishes. Dispatch iterates over a copy of the handler list taken when
//! `publish` starts, so a handler may subscribe or unsubscribe (itself or
//! others) without disturbing the dispatch in progress; such changes apply
//! from the next `publish` on.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Topic that receives every published payload regardless of its type.
pub const ANY: &str = "*";

type Handler<T> = Rc<dyn Fn(&T)>;

/// Returned by [`EventBus::subscribe`]; pass it to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct Registry<T> {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Handler<T>)>>,
}

/// Cheaply cloneable handle to a shared handler registry.
pub struct EventBus<T> {
    inner: Rc<RefCell<Registry<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry {
                next_id: 0,
                topics: HashMap::new(),
            })),
        }
    }

    /// Register `handler` for `topic` (or [`ANY`]).
    pub fn subscribe(&self, topic: &str, handler: impl Fn(&T) + 'static) -> Subscription {
        let mut registry = self.inner.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((id, Rc::new(handler)));
        Subscription {
            topic: topic.to_string(),
            id,
        }
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut registry = self.inner.borrow_mut();
        let Some(handlers) = registry.topics.get_mut(&subscription.topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.topics.remove(&subscription.topic);
        }
        removed
    }

    /// Deliver `payload` to the handlers of `topic` and the [`ANY`] handlers,
    /// interleaved in the order they subscribed. Returns how many ran.
    pub fn publish(&self, topic: &str, payload: &T) -> usize {
        let handlers: Vec<Handler<T>> = {
            let registry = self.inner.borrow();
            let mut matched: Vec<&(u64, Handler<T>)> =
                registry.topics.get(topic).into_iter().flatten().collect();
            if topic != ANY {
                matched.extend(registry.topics.get(ANY).into_iter().flatten());
            }
            matched.sort_by_key(|(id, _)| *id);
            matched
                .into_iter()
                .map(|(_, handler)| Rc::clone(handler))
                .collect()
        };

        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner
            .borrow()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }
}
