//! Reducers and the combinators that compose them.

use std::sync::Arc;

use crate::effect::Effect;

/// State transition. Mutates `state` in place and returns the effects to run.
///
/// Must not block or do I/O; anything asynchronous belongs in an `Effect`.
/// Implemented for every `Fn(&mut S, A) -> Vec<Effect<A>>` closure.
pub trait Reducer<S, A>: Send + Sync {
    fn reduce(&self, state: &mut S, action: A) -> Vec<Effect<A>>;

    fn boxed(self) -> BoxReducer<S, A>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl<S, A, F> Reducer<S, A> for F
where
    F: Fn(&mut S, A) -> Vec<Effect<A>> + Send + Sync,
{
    fn reduce(&self, state: &mut S, action: A) -> Vec<Effect<A>> {
        self(state, action)
    }
}

pub type BoxReducer<S, A> = Box<dyn Reducer<S, A>>;

// ---------------------------------------------------------------------------
// combine
// ---------------------------------------------------------------------------

/// Runs each reducer, in order, against the same state.
///
/// Sub-reducers are expected to own disjoint parts of the state. When two of
/// them write the same field, the later one wins.
pub struct Combine<S, A> {
    reducers: Vec<BoxReducer<S, A>>,
}

pub fn combine<S, A>(reducers: Vec<BoxReducer<S, A>>) -> Combine<S, A> {
    Combine { reducers }
}

impl<S, A> Combine<S, A> {
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<S, A> Reducer<S, A> for Combine<S, A>
where
    A: Clone,
{
    fn reduce(&self, state: &mut S, action: A) -> Vec<Effect<A>> {
        let mut effects = Vec::new();
        for reducer in &self.reducers {
            effects.extend(reducer.reduce(state, action.clone()));
        }
        effects
    }
}

/// `combine![a, b, c]` boxes each reducer and combines them in order.
#[macro_export]
macro_rules! combine {
    ($($reducer:expr),+ $(,)?) => {
        $crate::reducer::combine(vec![$($crate::reducer::Reducer::boxed($reducer)),+])
    };
}

// ---------------------------------------------------------------------------
// pullback
// ---------------------------------------------------------------------------

type Extract<GA, LA> = dyn Fn(&GA) -> Option<LA> + Send + Sync;
type Embed<GA, LA> = dyn Fn(&GA, LA) -> GA + Send + Sync;

/// Two-way mapping between a global action and an embedded local action.
pub struct ActionPath<GA, LA> {
    extract: Arc<Extract<GA, LA>>,
    embed: Arc<Embed<GA, LA>>,
}

impl<GA, LA> Clone for ActionPath<GA, LA> {
    fn clone(&self) -> Self {
        Self {
            extract: self.extract.clone(),
            embed: self.embed.clone(),
        }
    }
}

impl<GA: 'static, LA: 'static> ActionPath<GA, LA> {
    /// For enum-case actions: `extract` matches the case, `embed` wraps a
    /// local action back into it.
    pub fn new<X, E>(extract: X, embed: E) -> Self
    where
        X: Fn(&GA) -> Option<LA> + Send + Sync + 'static,
        E: Fn(LA) -> GA + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(extract),
            embed: Arc::new(move |_template: &GA, local| embed(local)),
        }
    }

    /// For actions with fields beside the local one: `embed` receives the
    /// original global action as a template and keeps its other fields.
    pub fn with_template<X, E>(extract: X, embed: E) -> Self
    where
        X: Fn(&GA) -> Option<LA> + Send + Sync + 'static,
        E: Fn(&GA, LA) -> GA + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(extract),
            embed: Arc::new(embed),
        }
    }

    pub fn extract(&self, global: &GA) -> Option<LA> {
        (self.extract)(global)
    }

    pub fn embed(&self, template: &GA, local: LA) -> GA {
        (self.embed)(template, local)
    }
}

/// Lift a reducer over `(LS, LA)` into one over `(GS, GA)`.
///
/// Global actions that don't carry a local action are ignored: no effects, no
/// state access. Otherwise the local reducer runs directly on the projected
/// state, and every local effect is mapped back into the global action shape
/// using the original global action as the template. The local state is
/// always written through, changed or not.
pub fn pullback<LS, LA, GS, GA, R, P>(
    reducer: R,
    state_path: P,
    action_path: ActionPath<GA, LA>,
) -> impl Reducer<GS, GA>
where
    LA: Send + 'static,
    GA: Clone + Send + 'static,
    R: Reducer<LS, LA>,
    P: Fn(&mut GS) -> &mut LS + Send + Sync,
{
    move |global: &mut GS, action: GA| -> Vec<Effect<GA>> {
        let Some(local_action) = action_path.extract(&action) else {
            return Vec::new();
        };

        let local_state = state_path(global);
        reducer
            .reduce(local_state, local_action)
            .into_iter()
            .map(|effect| {
                let path = action_path.clone();
                let template = action.clone();
                effect.map(move |local| path.embed(&template, local))
            })
            .collect()
    }
}
