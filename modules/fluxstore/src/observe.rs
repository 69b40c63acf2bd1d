//! State publication: a last-value cell with replaying subscribers.
//!
//! Every store and view keeps its state in a `Published<S>`. Subscribers get
//! the current value on subscribe and every change after that. Each change is
//! stamped with a version, and an observer only ever receives versions newer
//! than the last one it saw, so delivery stays monotonic even when an observer
//! dispatches back into the store while being notified.
//!
//! `Published` does no serialization of its own. Callers hold their store
//! tree's dispatch gate around `notify` and `subscribe`.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::stream::{Stream, StreamExt};
use parking_lot::{Mutex, MutexGuard};

type Deliver<S> = Box<dyn Fn(&S) + Send + Sync>;

struct Observer<S> {
    id: u64,
    seen: AtomicU64,
    deliver: Deliver<S>,
}

pub(crate) struct Published<S> {
    value: Mutex<S>,
    version: AtomicU64,
    observers: Mutex<Vec<Arc<Observer<S>>>>,
    next_observer: AtomicU64,
}

impl<S> Published<S>
where
    S: Clone + Send + 'static,
{
    pub(crate) fn new(value: S) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            version: AtomicU64::new(0),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(0),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, S> {
        self.value.lock()
    }

    /// Publish the current value to every observer that hasn't seen it.
    pub(crate) fn notify(&self) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let observers = self.observers.lock().clone();
        if observers.is_empty() {
            return;
        }

        let snapshot = self.value.lock().clone();
        for observer in observers {
            if observer.seen.fetch_max(version, Ordering::SeqCst) < version {
                (observer.deliver)(&snapshot);
            }
        }
    }

    /// Register for future changes only.
    pub(crate) fn observe<F>(self: &Arc<Self>, deliver: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        let observer = Arc::new(Observer {
            id,
            seen: AtomicU64::new(self.version.load(Ordering::SeqCst)),
            deliver: Box::new(deliver),
        });
        self.observers.lock().push(observer);

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(published) = weak.upgrade() {
                published.observers.lock().retain(|o| o.id != id);
            }
        })
    }

    /// Register, then immediately deliver the current value.
    pub(crate) fn subscribe<F>(self: &Arc<Self>, deliver: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let deliver = Arc::new(deliver);
        let replay = deliver.clone();
        let subscription = self.observe(move |state| deliver(state));
        let current = self.value.lock().clone();
        replay(&current);
        subscription
    }

    pub(crate) fn stream(self: &Arc<Self>) -> StateStream<S> {
        let (tx, rx) = mpsc::unbounded();
        let subscription = self.subscribe(move |state: &S| {
            let _ = tx.unbounded_send(state.clone());
        });
        StateStream {
            rx,
            _subscription: subscription,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Keeps an observer registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Unsubscribe now rather than at drop.
    pub fn cancel(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StateStream
// ---------------------------------------------------------------------------

/// Async stream of state values: the current one first, then every change.
/// Unsubscribes when dropped.
pub struct StateStream<S> {
    rx: mpsc::UnboundedReceiver<S>,
    _subscription: Subscription,
}

impl<S> Stream for StateStream<S> {
    type Item = S;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        self.rx.poll_next_unpin(cx)
    }
}
