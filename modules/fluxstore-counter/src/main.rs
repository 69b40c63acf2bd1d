use std::time::Duration;

use anyhow::{Context, Result};
use fluxstore::{Effect, Store, StoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, PartialEq)]
struct Counter {
    count: i64,
}

#[derive(Debug)]
enum CounterAction {
    Increment,
    IncrementDelayed,
}

fn counter_reducer(
    delay: Duration,
) -> impl Fn(&mut Counter, CounterAction) -> Vec<Effect<CounterAction>> + Send + Sync + 'static {
    move |state: &mut Counter, action: CounterAction| match action {
        CounterAction::Increment => {
            state.count += 1;
            vec![]
        }
        CounterAction::IncrementDelayed => vec![Effect::future(async move {
            tokio::time::sleep(delay).await;
            CounterAction::Increment
        })],
    }
}

fn env_number(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fluxstore=info".parse()?))
        .init();

    // Also loads `.env`, so the COUNTER_* variables below can live there too.
    let config = StoreConfig::from_env()?;
    let delay = Duration::from_millis(env_number("COUNTER_DELAY_MS", 250)?);
    let clicks = env_number("COUNTER_CLICKS", 3)?;

    info!(label = %config.label, ?delay, clicks, "Counter starting");

    let store = Store::with_config(Counter::default(), counter_reducer(delay), config)?;
    let view = store.view();
    let _log = view.subscribe(|state: &Counter| info!(count = state.count, "Count changed"));

    for _ in 0..clicks {
        store.dispatch(CounterAction::IncrementDelayed);
    }
    info!(
        count = store.state().count,
        active = store.active_effects(),
        "Clicks dispatched"
    );

    store.idle().await;

    let final_count = store.state().count;
    info!(count = final_count, active = store.active_effects(), "Counter settled");
    println!("count: {final_count}");

    Ok(())
}
