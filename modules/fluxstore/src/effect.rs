//! Effects: cancellable asynchronous producers of follow-up actions.
//!
//! An `Effect<O>` is a description of work, not the work itself. Nothing runs
//! until the effect is started, at which point it emits zero or more values of
//! `O` and then completes. There is no failure channel: an effect that can fail
//! must encode the failure into its own output type.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

// ---------------------------------------------------------------------------
// CancelId
// ---------------------------------------------------------------------------

/// Caller-chosen identity used to cancel in-flight effects by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancelId(String);

impl CancelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CancelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CancelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for CancelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

pub(crate) enum Work<O> {
    Run {
        stream: BoxStream<'static, O>,
        tag: Option<Tag>,
    },
    Cancel(CancelId),
}

#[derive(Debug, Clone)]
pub(crate) struct Tag {
    pub(crate) id: CancelId,
    pub(crate) cancel_in_flight: bool,
}

/// A unit of asynchronous work emitting 0..N values of `O`, then completing.
#[must_use = "effects do nothing unless returned to a store or started"]
pub struct Effect<O> {
    pub(crate) work: Work<O>,
}

impl<O: Send + 'static> Effect<O> {
    /// An effect that completes immediately without emitting.
    pub fn none() -> Self {
        Self::stream(stream::empty())
    }

    /// Defer `work` until the effect is started, then emit its result once.
    pub fn sync<F>(work: F) -> Self
    where
        F: FnOnce() -> O + Send + 'static,
    {
        Self::stream(stream::once(async move { work() }))
    }

    /// Emit the output of `fut` once it resolves.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = O> + Send + 'static,
    {
        Self::stream(stream::once(fut))
    }

    /// Emit every item of `source`, in order, then complete.
    pub fn stream<St>(source: St) -> Self
    where
        St: Stream<Item = O> + Send + 'static,
    {
        Self {
            work: Work::Run {
                stream: source.boxed(),
                tag: None,
            },
        }
    }

    /// Run `fut` for its side effect only. Emits nothing.
    pub fn fire_and_forget<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::stream(stream::once(fut).filter_map(|()| future::ready(None)))
    }

    /// Cancel every in-flight effect tagged with `id` in the store that starts
    /// this effect. Emits nothing.
    pub fn cancel(id: impl Into<CancelId>) -> Self {
        Self {
            work: Work::Cancel(id.into()),
        }
    }

    /// Tag this effect with `id` so it can be cancelled by name.
    ///
    /// With `cancel_in_flight`, starting this effect first cancels any effect
    /// already running under the same id ("last request wins").
    pub fn cancellable(self, id: impl Into<CancelId>, cancel_in_flight: bool) -> Self {
        match self.work {
            Work::Run { stream, .. } => Self {
                work: Work::Run {
                    stream,
                    tag: Some(Tag {
                        id: id.into(),
                        cancel_in_flight,
                    }),
                },
            },
            cancel @ Work::Cancel(_) => Self { work: cancel },
        }
    }

    /// Transform every emitted value. Used to lift local actions into a
    /// parent's action type.
    pub fn map<O2, F>(self, transform: F) -> Effect<O2>
    where
        O2: Send + 'static,
        F: FnMut(O) -> O2 + Send + 'static,
    {
        let work = match self.work {
            Work::Run { stream, tag } => Work::Run {
                stream: stream.map(transform).boxed(),
                tag,
            },
            Work::Cancel(id) => Work::Cancel(id),
        };
        Effect { work }
    }

    /// Start the effect on `runtime`.
    ///
    /// `on_output` runs for every emission in source order. `on_complete` runs
    /// once after the source is exhausted, and never if the returned handle was
    /// cancelled first. A cancel effect has nothing to run outside a store and
    /// completes straight away.
    pub fn start<F, C>(self, runtime: &Handle, mut on_output: F, on_complete: C) -> Cancellable
    where
        F: FnMut(O) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let mut source = match self.work {
            Work::Run { stream, .. } => stream,
            Work::Cancel(_) => stream::empty().boxed(),
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let task = runtime.spawn(async move {
            while let Some(output) = source.next().await {
                if flag.load(Ordering::Acquire) {
                    return;
                }
                on_output(output);
            }
            if !flag.load(Ordering::Acquire) {
                on_complete();
            }
        });

        Cancellable {
            cancelled,
            abort: task.abort_handle(),
        }
    }
}

impl<O> fmt::Debug for Effect<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.work {
            Work::Run { tag, .. } => f.debug_struct("Effect").field("tag", tag).finish(),
            Work::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellable
// ---------------------------------------------------------------------------

/// Handle to a started effect.
#[derive(Debug, Clone)]
pub struct Cancellable {
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl Cancellable {
    /// Suppress all further emissions and the completion signal.
    /// Idempotent, and a no-op once the effect has finished.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the underlying task has stopped, for any reason.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn collect<O: Send + 'static>(effect: Effect<O>) -> (Arc<Mutex<Vec<O>>>, oneshot::Receiver<()>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (done_tx, done_rx) = oneshot::channel();
        let _handle = effect.start(
            &Handle::current(),
            move |o| sink.lock().unwrap().push(o),
            move || {
                let _ = done_tx.send(());
            },
        );
        (seen, done_rx)
    }

    #[tokio::test]
    async fn sync_work_is_deferred_until_start() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let effect = Effect::sync(move || {
            flag.store(true, Ordering::SeqCst);
            7
        });
        assert!(!ran.load(Ordering::SeqCst));

        let (seen, done) = collect(effect);
        done.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn map_transforms_every_emission() {
        let effect = Effect::stream(stream::iter(vec![1, 2, 3])).map(|n| n * 10);
        let (seen, done) = collect(effect);
        done.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn none_and_fire_and_forget_complete_without_emitting() {
        let (seen, done) = collect(Effect::<u8>::none());
        done.await.unwrap();
        assert!(seen.lock().unwrap().is_empty());

        let (side_tx, side_rx) = oneshot::channel();
        let (seen, done) = collect(Effect::<u8>::fire_and_forget(async move {
            let _ = side_tx.send("ran");
        }));
        done.await.unwrap();
        assert_eq!(side_rx.await.unwrap(), "ran");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_suppresses_completion_and_is_idempotent() {
        let (_hold, never) = oneshot::channel::<u8>();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let handle = Effect::future(async move { never.await.unwrap_or(0) }).start(
            &Handle::current(),
            |_| {},
            move || flag.store(true, Ordering::SeqCst),
        );

        assert!(!handle.is_finished());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let (done_tx, done_rx) = oneshot::channel();
        let handle = Effect::sync(|| 1).start(&Handle::current(), |_| {}, move || {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
        tokio::task::yield_now().await;
        assert!(handle.is_finished());

        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn cancel_ids_compare_by_name() {
        let id = CancelId::from("search");
        assert_eq!(id, CancelId::new(String::from("search")));
        assert_eq!(id.as_str(), "search");
        assert_eq!(id.to_string(), "search");
        assert_ne!(id, CancelId::from("timer"));
    }
}
