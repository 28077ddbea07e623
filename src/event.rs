//! Events delivered to registered callbacks.
//!
//! Callbacks are grouped by [`EventKind`] and invoked synchronously, in registration
//! order, on the connection's receive task. A callback that blocks stalls frame
//! processing; hand long work off to another task.
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::{close::CloseCode, WebSocketError};

/// The kinds of events a connection emits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Close,
    Error,
    Ping,
    Pong,
}

/// A decoded occurrence on the connection.
#[derive(Debug)]
pub enum Event {
    /// A complete (possibly reassembled) data message.
    Message {
        payload: Bytes,
        /// Taken from the opcode of the first fragment.
        is_binary: bool,
    },
    /// The connection closed.
    ///
    /// `reason` holds the bytes following the status code of a received close frame,
    /// or the reason passed to [`crate::WebSocket::close`].
    Close {
        code: Option<CloseCode>,
        reason: Bytes,
    },
    /// A transport or protocol failure. Emitted at most once per connection.
    Error(WebSocketError),
    /// A ping from the peer. A pong with the same payload is sent automatically.
    Ping(Bytes),
    /// A pong from the peer.
    Pong(Bytes),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message { .. } => EventKind::Message,
            Self::Close { .. } => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Ping(_) => EventKind::Ping,
            Self::Pong(_) => EventKind::Pong,
        }
    }
}

/// A registered event callback.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registry of callbacks, one ordered list per [`EventKind`].
#[derive(Default, Clone)]
pub struct Listeners {
    message: Vec<Callback>,
    close: Vec<Callback>,
    error: Vec<Callback>,
    ping: Vec<Callback>,
    pong: Vec<Callback>,
}

impl Listeners {
    fn slot(&self, kind: EventKind) -> &Vec<Callback> {
        match kind {
            EventKind::Message => &self.message,
            EventKind::Close => &self.close,
            EventKind::Error => &self.error,
            EventKind::Ping => &self.ping,
            EventKind::Pong => &self.pong,
        }
    }

    fn slot_mut(&mut self, kind: EventKind) -> &mut Vec<Callback> {
        match kind {
            EventKind::Message => &mut self.message,
            EventKind::Close => &mut self.close,
            EventKind::Error => &mut self.error,
            EventKind::Ping => &mut self.ping,
            EventKind::Pong => &mut self.pong,
        }
    }

    /// Appends `callback` to the list for `kind`.
    pub fn push(&mut self, kind: EventKind, callback: Callback) {
        self.slot_mut(kind).push(callback);
    }

    /// Number of callbacks registered for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.slot(kind).len()
    }
}

/// Shared, thread-safe listener registry owned by a connection.
#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<Listeners>,
}

impl Registry {
    pub(crate) fn new(listeners: Listeners) -> Self {
        Self {
            inner: Mutex::new(listeners),
        }
    }

    pub(crate) fn register(&self, kind: EventKind, callback: Callback) {
        self.lock().push(kind, callback);
    }

    /// Invokes every callback registered for the event's kind, in registration order.
    ///
    /// The list is snapshotted first so callbacks may register further callbacks.
    pub(crate) fn emit(&self, event: &Event) {
        let callbacks = self.lock().slot(event.kind()).clone();
        for callback in callbacks {
            callback(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        // callbacks never run under the lock
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = Registry::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = Arc::clone(&seen);
            registry.register(
                EventKind::Ping,
                Arc::new(move |_: &Event| seen.lock().unwrap().push(id)),
            );
        }

        registry.emit(&Event::Ping(Bytes::new()));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dispatch_only_matching_kind() {
        let registry = Registry::default();
        let hits = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&hits);
        registry.register(
            EventKind::Pong,
            Arc::new(move |_: &Event| *counter.lock().unwrap() += 1),
        );

        registry.emit(&Event::Ping(Bytes::new()));
        registry.emit(&Event::Pong(Bytes::from_static(b"x")));
        registry.emit(&Event::Message {
            payload: Bytes::new(),
            is_binary: false,
        });

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_callback_may_register_during_dispatch() {
        let registry = Arc::new(Registry::default());
        let inner = Arc::clone(&registry);

        registry.register(
            EventKind::Message,
            Arc::new(move |_: &Event| {
                inner.register(EventKind::Message, Arc::new(|_: &Event| {}));
            }),
        );

        registry.emit(&Event::Message {
            payload: Bytes::new(),
            is_binary: true,
        });
        assert_eq!(registry.lock().count(EventKind::Message), 2);
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(Event::Error(WebSocketError::ConnectionClosed).kind(), EventKind::Error);
        assert_eq!(
            Event::Close {
                code: Some(CloseCode::Normal),
                reason: Bytes::new()
            }
            .kind(),
            EventKind::Close
        );
    }
}
