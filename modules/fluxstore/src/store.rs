//! The store: state container, dispatch loop, and effect lifecycle.
//!
//! dispatch → reduce (in place) → publish → start effects → each emission
//! re-enters dispatch on the same store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::config::StoreConfig;
use crate::effect::{CancelId, Cancellable, Effect, Work};
use crate::error::Result;
use crate::observe::{Published, StateStream, Subscription};
use crate::reducer::Reducer;

/// Serializes everything that touches a store tree: a root store plus every
/// store and view derived from it. Re-entrant so that a scoped store can
/// forward to its parent, and observers can dispatch while being notified.
pub(crate) type Gate = Arc<ReentrantMutex<()>>;

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

/// How a store turns an action into a state change.
enum Driver<S, A> {
    /// Run the reducer on this store's own state.
    Reduce(Box<dyn Reducer<S, A>>),
    /// Hand the action to a parent store. State arrives through the parent's
    /// notifications.
    Forward(Box<dyn Fn(A) + Send + Sync>),
}

struct Running {
    handle: Cancellable,
    cancel_id: Option<CancelId>,
}

struct Core<S, A> {
    label: String,
    gate: Gate,
    state: Arc<Published<S>>,
    driver: Driver<S, A>,
    effects: Mutex<HashMap<u64, Running>>,
    in_flight: watch::Sender<usize>,
    effect_warn_threshold: usize,
    runtime: Handle,
    upstream: Mutex<Option<Subscription>>,
}

impl<S, A> Core<S, A> {
    fn cancel_everything(&self) {
        let drained: Vec<Running> = self.effects.lock().drain().map(|(_, r)| r).collect();
        if drained.is_empty() {
            return;
        }
        for running in &drained {
            running.handle.cancel();
        }
        self.in_flight.send_replace(0);
        debug!(store = %self.label, cancelled = drained.len(), "Cancelled in-flight effects");
    }
}

impl<S, A> Drop for Core<S, A> {
    fn drop(&mut self) {
        self.cancel_everything();
    }
}

/// Owner of one state value, its reducer, and the effects it has started.
///
/// `Store` is a cheap handle; clones share the same state. The store is torn
/// down when the last handle drops, which cancels every in-flight effect.
/// Effects only hold a weak reference back to the store.
pub struct Store<S, A> {
    core: Arc<Core<S, A>>,
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<S, A> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("label", &self.core.label)
            .field("active_effects", &self.core.effects.lock().len())
            .finish()
    }
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + 'static,
    A: Send + 'static,
{
    /// Create a root store on the current tokio runtime.
    ///
    /// Panics outside a runtime, like `tokio::spawn`. Use `with_config` to
    /// get an error instead or to pick a runtime explicitly.
    pub fn new<R>(state: S, reducer: R) -> Self
    where
        R: Reducer<S, A> + 'static,
    {
        Self::assemble(
            state,
            Driver::Reduce(Box::new(reducer)),
            StoreConfig::default(),
            Handle::current(),
            Arc::new(ReentrantMutex::new(())),
        )
    }

    pub fn with_config<R>(state: S, reducer: R, config: StoreConfig) -> Result<Self>
    where
        R: Reducer<S, A> + 'static,
    {
        let runtime = config.resolve_runtime()?;
        Ok(Self::assemble(
            state,
            Driver::Reduce(Box::new(reducer)),
            config,
            runtime,
            Arc::new(ReentrantMutex::new(())),
        ))
    }

    fn assemble(
        state: S,
        driver: Driver<S, A>,
        config: StoreConfig,
        runtime: Handle,
        gate: Gate,
    ) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            core: Arc::new(Core {
                label: config.label,
                gate,
                state: Published::new(state),
                driver,
                effects: Mutex::new(HashMap::new()),
                in_flight,
                effect_warn_threshold: config.effect_warn_threshold,
                runtime,
                upstream: Mutex::new(None),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    /// Run the reducer, publish the new state, and start the returned effects
    /// in order.
    ///
    /// On return the state transition and every effect start have happened.
    /// Effect output arrives later, through further dispatches. A scoped store
    /// forwards the action to its parent instead.
    pub fn dispatch(&self, action: A) {
        let _gate = self.core.gate.lock();

        let reducer = match &self.core.driver {
            Driver::Reduce(reducer) => reducer,
            Driver::Forward(forward) => {
                trace!(store = %self.core.label, "Forwarded to parent");
                forward(action);
                return;
            }
        };

        let effects = {
            let mut state = self.core.state.lock();
            reducer.reduce(&mut *state, action)
        };
        trace!(store = %self.core.label, effects = effects.len(), "Dispatched");

        self.core.state.notify();

        for effect in effects {
            self.start(effect);
        }
    }

    fn start(&self, effect: Effect<A>) {
        let (stream, tag) = match effect.work {
            Work::Cancel(id) => {
                self.cancel(&id);
                return;
            }
            Work::Run { stream, tag } => (stream, tag),
        };

        if let Some(tag) = tag.as_ref().filter(|t| t.cancel_in_flight) {
            self.cancel(&tag.id);
        }

        let id = NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed);
        let on_output = {
            let store = Arc::downgrade(&self.core);
            move |action: A| {
                if let Some(core) = store.upgrade() {
                    Store { core }.feed(id, action);
                }
            }
        };
        let on_complete = {
            let store = Arc::downgrade(&self.core);
            move || finish(&store, id)
        };

        let runnable = Effect {
            work: Work::Run { stream, tag: None },
        };
        // The gate is held, so neither callback can observe the effect
        // before it is registered below.
        let handle = runnable.start(&self.core.runtime, on_output, on_complete);

        let active = {
            let mut effects = self.core.effects.lock();
            effects.insert(
                id,
                Running {
                    handle,
                    cancel_id: tag.map(|t| t.id),
                },
            );
            effects.len()
        };
        self.core.in_flight.send_replace(active);

        debug!(store = %self.core.label, effect_id = id, active, "Effect started");
        if active == self.core.effect_warn_threshold {
            warn!(
                store = %self.core.label,
                active,
                "In-flight effects reached warning threshold"
            );
        }
    }

    /// Deliver an effect emission, unless the effect was cancelled meanwhile.
    fn feed(&self, id: u64, action: A) {
        let _gate = self.core.gate.lock();
        let live = self.core.effects.lock().contains_key(&id);
        if !live {
            trace!(store = %self.core.label, effect_id = id, "Dropped output of cancelled effect");
            return;
        }
        self.dispatch(action);
    }

    /// Cancel every in-flight effect tagged with `id`.
    pub fn cancel(&self, id: &CancelId) {
        let _gate = self.core.gate.lock();
        let (cancelled, active) = {
            let mut effects = self.core.effects.lock();
            let matching: Vec<u64> = effects
                .iter()
                .filter(|(_, r)| r.cancel_id.as_ref() == Some(id))
                .map(|(effect_id, _)| *effect_id)
                .collect();
            for effect_id in &matching {
                if let Some(running) = effects.remove(effect_id) {
                    running.handle.cancel();
                }
            }
            (matching.len(), effects.len())
        };
        if cancelled > 0 {
            self.core.in_flight.send_replace(active);
            debug!(store = %self.core.label, cancel_id = %id, cancelled, "Cancelled effects");
        }
    }

    /// Cancel every in-flight effect.
    pub fn cancel_all(&self) {
        let _gate = self.core.gate.lock();
        self.core.cancel_everything();
    }

    /// Number of effects started and not yet completed or cancelled.
    pub fn active_effects(&self) -> usize {
        self.core.effects.lock().len()
    }

    /// Resolves once no effects are in flight.
    pub async fn idle(&self) {
        let mut in_flight = self.core.in_flight.subscribe();
        let _ = in_flight.wait_for(|n| *n == 0).await;
    }

    /// A copy of the current state.
    pub fn state(&self) -> S {
        self.with_state(S::clone)
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        let _gate = self.core.gate.lock();
        let state = self.core.state.lock();
        f(&*state)
    }

    /// Call `observer` with the current state now and after every change,
    /// until the returned subscription is dropped.
    ///
    /// Observers never see an older state after a newer one. When another
    /// observer dispatches while being notified, the states in between can be
    /// skipped and only the latest one delivered.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let _gate = self.core.gate.lock();
        self.core.state.subscribe(observer)
    }

    /// The state as an async stream: current value first, then every change.
    pub fn changes(&self) -> StateStream<S> {
        let _gate = self.core.gate.lock();
        self.core.state.stream()
    }

    /// Derive a store over a slice of this store's state.
    ///
    /// Local actions are embedded with `from_local` and dispatched here. The
    /// scoped store has no reducer and starts no effects of its own; its state
    /// is `to_local` of this store's state, refreshed on every change for as
    /// long as the scoped store lives. Dropping it releases that subscription.
    ///
    /// The scoped store holds a handle to this store, so this store stays
    /// alive while any scope derived from it does. This store does not keep
    /// its scopes alive.
    pub fn scope<LS, LA, P, E>(&self, to_local: P, from_local: E) -> Store<LS, LA>
    where
        LS: Clone + Send + 'static,
        LA: Send + 'static,
        P: Fn(&S) -> LS + Send + Sync + 'static,
        E: Fn(LA) -> A + Send + Sync + 'static,
    {
        let _gate = self.core.gate.lock();
        let to_local = Arc::new(to_local);

        let initial = to_local(&*self.core.state.lock());
        let forward = {
            let parent = self.clone();
            move |action: LA| parent.dispatch(from_local(action))
        };

        let child = Store::assemble(
            initial,
            Driver::Forward(Box::new(forward)),
            StoreConfig {
                label: format!("{}/scope", self.core.label),
                effect_warn_threshold: self.core.effect_warn_threshold,
                runtime: None,
            },
            self.core.runtime.clone(),
            self.core.gate.clone(),
        );

        let link = {
            let child = Arc::downgrade(&child.core);
            self.core.state.observe(move |global: &S| {
                if let Some(core) = child.upgrade() {
                    resync(&core, to_local(global));
                }
            })
        };
        *child.core.upstream.lock() = Some(link);

        debug!(parent = %self.core.label, store = %child.core.label, "Scoped store created");
        child
    }

    pub(crate) fn gate(&self) -> Gate {
        self.core.gate.clone()
    }

    pub(crate) fn published(&self) -> &Arc<Published<S>> {
        &self.core.state
    }
}

/// Remove a naturally completed effect from its store's active set.
fn finish<S, A>(store: &Weak<Core<S, A>>, id: u64) {
    let Some(core) = store.upgrade() else {
        return;
    };
    let _gate = core.gate.lock();
    let removed = {
        let mut effects = core.effects.lock();
        effects.remove(&id).map(|_| effects.len())
    };
    if let Some(active) = removed {
        core.in_flight.send_replace(active);
        debug!(store = %core.label, effect_id = id, active, "Effect completed");
    }
}

/// Overwrite a scoped store's state after its parent changed. Callers hold
/// the gate.
fn resync<S, A>(core: &Core<S, A>, local: S)
where
    S: Clone + Send + 'static,
{
    *core.state.lock() = local;
    core.state.notify();
}
