//! Typed event sources (`add_X` / `remove_X`)

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Cookie returned by `add_X`, passed back to `remove_X`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRegistrationToken(pub i64);

/// `TypedEventHandler<TSender, TArgs>`
pub type TypedEventHandler<S, A> = Arc<dyn Fn(&S, &A) + Send + Sync>;

pub struct EventSource<S, A> {
    handlers: Mutex<Vec<(EventRegistrationToken, TypedEventHandler<S, A>)>>,
    next_token: AtomicI64,
}

impl<S, A> EventSource<S, A> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_token: AtomicI64::new(1),
        }
    }

    /// Register `handler`; returns the token and whether it is the first.
    pub fn add(&self, handler: TypedEventHandler<S, A>) -> (EventRegistrationToken, bool) {
        let token = EventRegistrationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.lock();
        handlers.push((token, handler));
        (token, handlers.len() == 1)
    }

    /// Unregister `token`; returns whether it was found and whether the
    /// source is now empty.
    pub fn remove(&self, token: EventRegistrationToken) -> (bool, bool) {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        (handlers.len() != before, handlers.is_empty())
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    /// Call every handler registered at the time of the call. Handlers may
    /// add or remove registrations while running.
    pub fn invoke(&self, sender: &S, args: &A) {
        let snapshot: Vec<_> = self.handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in snapshot {
            handler(sender, args);
        }
    }
}

impl<S, A> Default for EventSource<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let source: EventSource<u32, u32> = EventSource::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        let b = Arc::clone(&seen);
        let (first, was_first) = source.add(Arc::new(move |s, v| a.lock().push((1, *s, *v))));
        let (_, second_first) = source.add(Arc::new(move |s, v| b.lock().push((2, *s, *v))));
        assert!(was_first);
        assert!(!second_first);

        source.invoke(&7, &9);
        assert_eq!(*seen.lock(), vec![(1, 7, 9), (2, 7, 9)]);

        assert_eq!(source.remove(first), (true, false));
        assert_eq!(source.remove(first), (false, false));
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn handler_may_unregister_itself() {
        let source = Arc::new(EventSource::<(), ()>::new());
        let token = Arc::new(Mutex::new(None));
        let inner_source = Arc::clone(&source);
        let inner_token = Arc::clone(&token);
        let (t, _) = source.add(Arc::new(move |_, _| {
            if let Some(t) = *inner_token.lock() {
                inner_source.remove(t);
            }
        }));
        *token.lock() = Some(t);
        source.invoke(&(), &());
        assert!(source.is_empty());
    }
}
