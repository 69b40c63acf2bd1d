//! Scoped stores and views.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fluxstore::{Effect, Store};
use futures::StreamExt;

// ---------------------------------------------------------------------------
// App fixture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
struct App {
    count: i32,
    title: String,
}

#[derive(Debug)]
enum AppAction {
    Counter(CounterAction),
    Rename(&'static str),
}

#[derive(Debug)]
enum CounterAction {
    Increment,
    IncrementLater,
}

fn app_reducer(state: &mut App, action: AppAction) -> Vec<Effect<AppAction>> {
    match action {
        AppAction::Counter(CounterAction::Increment) => {
            state.count += 1;
            vec![]
        }
        AppAction::Counter(CounterAction::IncrementLater) => vec![Effect::future(async {
            tokio::task::yield_now().await;
            AppAction::Counter(CounterAction::Increment)
        })],
        AppAction::Rename(title) => {
            state.title = title.to_string();
            vec![]
        }
    }
}

fn app_store() -> Store<App, AppAction> {
    Store::new(App::default(), app_reducer)
}

fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
}

// ---------------------------------------------------------------------------
// scope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_dispatch_updates_parent_and_resyncs_child() {
    let root = app_store();
    let counter = root.scope(|app: &App| app.count, AppAction::Counter);

    counter.dispatch(CounterAction::Increment);

    assert_eq!(root.state().count, 1);
    assert_eq!(counter.state(), 1);
}

#[tokio::test]
async fn child_follows_changes_made_on_the_parent() {
    let root = app_store();
    let counter = root.scope(|app: &App| app.count, AppAction::Counter);

    let (seen, record) = recorder::<i32>();
    let _subscription = counter.subscribe(record);

    root.dispatch(AppAction::Counter(CounterAction::Increment));
    root.dispatch(AppAction::Counter(CounterAction::Increment));

    assert_eq!(counter.state(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn parent_effects_reach_the_child() {
    let root = app_store();
    let counter = root.scope(|app: &App| app.count, AppAction::Counter);

    counter.dispatch(CounterAction::IncrementLater);

    // The effect lives on the parent; the child starts none of its own.
    assert_eq!(counter.active_effects(), 0);
    assert_eq!(root.active_effects(), 1);
    assert_eq!(counter.state(), 0);

    root.idle().await;

    assert_eq!(root.state().count, 1);
    assert_eq!(counter.state(), 1);
}

#[tokio::test]
async fn nested_scopes_stay_in_sync() {
    let root = app_store();
    let title = root.scope(|app: &App| app.title.clone(), |name: &'static str| AppAction::Rename(name));
    let initial = title.scope(|t: &String| t.chars().next(), |name: &'static str| name);

    initial.dispatch("fluxstore");

    assert_eq!(root.state().title, "fluxstore");
    assert_eq!(title.state(), "fluxstore");
    assert_eq!(initial.state(), Some('f'));

    root.dispatch(AppAction::Rename("counter"));
    assert_eq!(initial.state(), Some('c'));
}

#[tokio::test]
async fn parent_subscriber_can_dispatch_into_the_scope() {
    let root = Store::new(0i32, |count: &mut i32, delta: i32| -> Vec<Effect<i32>> {
        *count += delta;
        vec![]
    });
    let child = root.scope(|count: &i32| *count, |delta: i32| delta);

    let bounce = child.clone();
    let subscription = root.subscribe(move |count: &i32| {
        if *count == 1 {
            bounce.dispatch(10);
        }
    });

    child.dispatch(1);

    assert_eq!(root.state(), 11);
    assert_eq!(child.state(), 11);
    drop(subscription);
}

#[tokio::test]
async fn view_subscriber_can_dispatch_into_the_scope() {
    let root = app_store();
    let counter = root.scope(|app: &App| app.count, AppAction::Counter);
    let view = counter.view();

    let bounce = counter.clone();
    let subscription = view.subscribe(move |count: &i32| {
        if *count == 1 {
            bounce.dispatch(CounterAction::Increment);
        }
    });

    counter.dispatch(CounterAction::Increment);

    assert_eq!(root.state().count, 2);
    assert_eq!(counter.state(), 2);
    assert_eq!(view.state(), 2);
    drop(subscription);
}

#[tokio::test]
async fn dropping_a_scope_releases_its_parent_subscription() {
    let root = app_store();
    let projections = Arc::new(AtomicUsize::new(0));
    let counter = {
        let projections = projections.clone();
        root.scope(
            move |app: &App| {
                projections.fetch_add(1, Ordering::SeqCst);
                app.count
            },
            AppAction::Counter,
        )
    };

    // Initial projection, then one per parent change.
    counter.dispatch(CounterAction::Increment);
    assert_eq!(projections.load(Ordering::SeqCst), 2);

    drop(counter);
    assert_eq!(Arc::strong_count(&projections), 1);

    root.dispatch(AppAction::Counter(CounterAction::Increment));
    root.dispatch(AppAction::Rename("after"));
    assert_eq!(projections.load(Ordering::SeqCst), 2);
    assert_eq!(root.state().count, 2);
}

#[tokio::test]
async fn scope_keeps_its_parent_alive() {
    let root = app_store();
    let counter = root.scope(|app: &App| app.count, AppAction::Counter);
    drop(root);

    counter.dispatch(CounterAction::Increment);
    counter.dispatch(CounterAction::Increment);
    assert_eq!(counter.state(), 2);
}

// ---------------------------------------------------------------------------
// view
// ---------------------------------------------------------------------------

#[tokio::test]
async fn view_drops_duplicate_states() {
    let store = Store::new(0u32, |state: &mut u32, next: u32| -> Vec<Effect<u32>> {
        *state = next;
        vec![]
    });
    let view = store.view();

    let (raw, record_raw) = recorder::<u32>();
    let _raw = store.subscribe(record_raw);
    let (deduped, record_deduped) = recorder::<u32>();
    let _deduped = view.subscribe(record_deduped);

    store.dispatch(1);
    store.dispatch(1);
    store.dispatch(2);

    assert_eq!(*raw.lock().unwrap(), vec![0, 1, 1, 2]);
    assert_eq!(*deduped.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(view.state(), 2);
}

#[tokio::test]
async fn view_with_custom_duplicate_check() {
    let store = Store::new(0u32, |state: &mut u32, next: u32| -> Vec<Effect<u32>> {
        *state = next;
        vec![]
    });
    // Only parity changes count as new values.
    let parity = store.view_with(|previous, next| previous % 2 == next % 2);

    let (seen, record) = recorder::<u32>();
    let _subscription = parity.subscribe(record);

    for n in [2, 4, 5, 7, 8] {
        store.dispatch(n);
    }

    assert_eq!(*seen.lock().unwrap(), vec![0, 5, 8]);
}

#[tokio::test]
async fn dropping_a_view_releases_its_store_subscription() {
    let store = Store::new(0u32, |state: &mut u32, next: u32| -> Vec<Effect<u32>> {
        *state = next;
        vec![]
    });
    let checks = Arc::new(AtomicUsize::new(0));
    let view = {
        let checks = checks.clone();
        store.view_with(move |previous, next| {
            checks.fetch_add(1, Ordering::SeqCst);
            previous == next
        })
    };

    store.dispatch(1);
    assert_eq!(checks.load(Ordering::SeqCst), 1);

    drop(view);
    assert_eq!(Arc::strong_count(&checks), 1);

    store.dispatch(2);
    assert_eq!(checks.load(Ordering::SeqCst), 1);
    assert_eq!(store.state(), 2);
}

#[tokio::test]
async fn view_dispatch_forwards_to_the_store() {
    let root = app_store();
    let view = root.view();

    view.dispatch(AppAction::Rename("viewed"));
    view.dispatch(AppAction::Counter(CounterAction::IncrementLater));
    root.idle().await;

    assert_eq!(root.state().title, "viewed");
    assert_eq!(view.state().count, 1);
    assert_eq!(view.with_state(|app| app.title.len()), 6);
}

#[tokio::test]
async fn view_of_a_scope_ignores_unrelated_parent_changes() {
    let root = app_store();
    let counter = root.scope(|app: &App| app.count, AppAction::Counter).view();

    let mut changes = counter.changes();
    assert_eq!(changes.next().await, Some(0));

    root.dispatch(AppAction::Rename("a"));
    root.dispatch(AppAction::Rename("b"));
    root.dispatch(AppAction::Counter(CounterAction::Increment));

    assert_eq!(changes.next().await, Some(1));
}
