//! Read-only, deduplicated projections of a store.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::observe::{Published, StateStream, Subscription};
use crate::store::{Gate, Store};

/// A store's state filtered through a duplicate check, plus a dispatch that
/// forwards straight to the store. Owns no reducer and no effects.
pub struct ViewStore<S, A> {
    store: Store<S, A>,
    gate: Gate,
    state: Arc<Published<S>>,
    _upstream: Subscription,
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + 'static,
    A: Send + 'static,
{
    /// View that drops updates equal to the previous value.
    pub fn view(&self) -> ViewStore<S, A>
    where
        S: PartialEq,
    {
        self.view_with(|previous, next| previous == next)
    }

    /// View that drops an update whenever `is_duplicate(previous, next)`.
    pub fn view_with<F>(&self, is_duplicate: F) -> ViewStore<S, A>
    where
        F: Fn(&S, &S) -> bool + Send + Sync + 'static,
    {
        let gate = self.gate();
        let _guard = gate.lock();

        let state = Published::new(self.state());
        let upstream = {
            let view = Arc::downgrade(&state);
            self.published().observe(move |next: &S| {
                let Some(view) = view.upgrade() else {
                    return;
                };
                let changed = {
                    let mut current = view.lock();
                    if is_duplicate(&*current, next) {
                        false
                    } else {
                        *current = next.clone();
                        true
                    }
                };
                if changed {
                    view.notify();
                }
            })
        };

        debug!(store = %self.label(), "View created");
        ViewStore {
            store: self.clone(),
            gate: gate.clone(),
            state,
            _upstream: upstream,
        }
    }
}

impl<S, A> ViewStore<S, A>
where
    S: Clone + Send + 'static,
    A: Send + 'static,
{
    /// Forward to the underlying store.
    pub fn dispatch(&self, action: A) {
        self.store.dispatch(action);
    }

    pub fn state(&self) -> S {
        self.with_state(S::clone)
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        let _guard = self.gate.lock();
        let state = self.state.lock();
        f(&*state)
    }

    /// Current value now, then every deduplicated change.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let _guard = self.gate.lock();
        self.state.subscribe(observer)
    }

    pub fn changes(&self) -> StateStream<S> {
        let _guard = self.gate.lock();
        self.state.stream()
    }
}

impl<S, A> fmt::Debug for ViewStore<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewStore").field("store", &self.store).finish()
    }
}
