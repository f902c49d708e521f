//! Uniform parallel/sequential work dispatch, cancellation, and timing.
//!
//! The engine never hand-rolls a thread pool: `rayon` backs the parallel
//! variant the way it backs scoped work-stealing dispatch elsewhere in this
//! source lineage. `ParallelMap` exists so every call site -- rule search,
//! metadata updates, class canonicalization -- picks its concurrency degree
//! through one small trait rather than threading `rayon` calls everywhere.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use thiserror::Error;

/// Raised when a [`CancellationToken`] was observed tripped at a checkpoint.
#[derive(Debug, Clone, Copy, Error)]
#[error("operation canceled")]
pub struct Canceled;

/// A cooperative, clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(std::sync::Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    #[must_use]
    pub fn is_canceled(&self) -> bool { self.0.load(Ordering::SeqCst) }

    /// Returns [`Canceled`] if this token has been tripped.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }
}

/// Dispatches a mapping function over a collection, either sequentially, via
/// a shared `rayon` global pool, or via a dedicated fixed-size pool.
pub trait ParallelMap: Clone + Send + Sync {
    fn map_collect<T: Send, U: Send, F: Fn(T) -> U + Sync>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Vec<U>;

    /// A child dispatcher for nested parallel work; sequential/rayon-global
    /// variants return a clone of themselves, fixed-thread pools narrow
    /// further calls to the same pool so nested work doesn't oversubscribe.
    #[must_use]
    fn child(&self) -> Self { self.clone() }

    /// Wraps this dispatcher so every mapped call checks `token` first and
    /// returns [`Canceled`] for any item processed after cancellation.
    fn cancelable(self, token: CancellationToken) -> Cancelable<Self>
    where Self: Sized {
        Cancelable { inner: self, token }
    }

    /// Wraps this dispatcher so the wall-clock duration of each
    /// `map_collect` call is recorded.
    fn timed(self) -> Timed<Self>
    where Self: Sized {
        Timed {
            inner: self,
            elapsed: std::sync::Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Runs a block of work under this dispatcher's execution context.
    ///
    /// The sequential and global-pool variants just call `block` on the
    /// calling thread; [`FixedThreads`] overrides this to run it inside its
    /// dedicated pool, so nested `rayon` work spawned from `block` stays
    /// confined to that pool rather than escaping to the global one.
    fn run<R: Send>(&self, block: impl FnOnce() -> R + Send) -> R { block() }

    /// Collects values pushed through a callback by `f`, under a mutex so
    /// `f` may push from multiple worker threads.
    fn collect_from<T: Send>(&self, f: impl FnOnce(&mut dyn FnMut(T)) + Send) -> Vec<T> {
        let sink: Mutex<Vec<T>> = Mutex::new(Vec::new());
        self.run(|| {
            let mut push = |item: T| {
                sink.lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(item);
            };
            f(&mut push);
        });
        sink.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Runs every item on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl ParallelMap for Sequential {
    fn map_collect<T: Send, U: Send, F: Fn(T) -> U + Sync>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Vec<U> {
        items.into_iter().map(f).collect()
    }
}

/// Dispatches onto `rayon`'s global thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

impl ParallelMap for Parallel {
    fn map_collect<T: Send, U: Send, F: Fn(T) -> U + Sync>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Vec<U> {
        use rayon::prelude::*;
        items.into_par_iter().map(f).collect()
    }
}

/// Dispatches onto a dedicated `rayon` pool of `n` threads (`n == 1`
/// collapses to the same behavior as [`Sequential`]).
#[derive(Clone)]
pub struct FixedThreads(std::sync::Arc<rayon::ThreadPool>);

impl fmt::Debug for FixedThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedThreads")
            .field("threads", &self.0.current_num_threads())
            .finish()
    }
}

use std::fmt;

impl FixedThreads {
    /// # Panics
    /// Panics if `rayon` fails to spin up a pool with `threads` workers.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .expect("failed to build fixed-size thread pool");
        Self(std::sync::Arc::new(pool))
    }
}

impl ParallelMap for FixedThreads {
    fn map_collect<T: Send, U: Send, F: Fn(T) -> U + Sync>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Vec<U> {
        use rayon::prelude::*;
        self.0.install(|| items.into_par_iter().map(f).collect())
    }

    fn run<R: Send>(&self, block: impl FnOnce() -> R + Send) -> R { self.0.install(block) }
}

/// A [`ParallelMap`] that checks a [`CancellationToken`] before each item.
#[derive(Debug, Clone)]
pub struct Cancelable<P> {
    inner: P,
    token: CancellationToken,
}

impl<P: ParallelMap> Cancelable<P> {
    #[must_use]
    pub fn token(&self) -> &CancellationToken { &self.token }

    /// Like [`ParallelMap::map_collect`], but short-circuits with
    /// [`Canceled`] as soon as the token trips.
    ///
    /// # Errors
    /// [`Canceled`] once cancellation is observed; items already dispatched
    /// before that point still run to completion (cancellation here is
    /// cooperative, not preemptive).
    pub fn try_map_collect<T: Send, U: Send, F: Fn(T) -> Result<U, Canceled> + Sync>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Result<Vec<U>, Canceled> {
        let token = self.token.clone();
        let results = self.inner.map_collect(items, |item| {
            if token.is_canceled() {
                tracing::debug!("cancellation observed at dispatch checkpoint");
                Err(Canceled)
            } else {
                f(item)
            }
        });
        results.into_iter().collect()
    }
}

impl<P: ParallelMap> ParallelMap for Cancelable<P> {
    fn map_collect<T: Send, U: Send, F: Fn(T) -> U + Sync>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Vec<U> {
        self.inner.map_collect(items, f)
    }
}

/// A [`ParallelMap`] that records the wall-clock time spent in each
/// `map_collect` call.
#[derive(Debug, Clone)]
pub struct Timed<P> {
    inner: P,
    elapsed: std::sync::Arc<Mutex<Duration>>,
}

impl<P: ParallelMap> Timed<P> {
    /// Total time spent across every call so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<P: ParallelMap> ParallelMap for Timed<P> {
    fn map_collect<T: Send, U: Send, F: Fn(T) -> U + Sync>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Vec<U> {
        let start = Instant::now();
        let result = self.inner.map_collect(items, f);
        let mut elapsed = self
            .elapsed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *elapsed += start.elapsed();
        result
    }
}

#[cfg(test)]
mod test {
    use super::{CancellationToken, Parallel, ParallelMap, Sequential};

    #[test]
    fn sequential_map_preserves_order() {
        let out = Sequential.map_collect(vec![1, 2, 3], |x| x * 2);
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[test]
    fn parallel_map_matches_sequential() {
        let input: Vec<i32> = (0..256).collect();
        let seq = Sequential.map_collect(input.clone(), |x| x * x);
        let par = Parallel.map_collect(input, |x| x * x);
        assert_eq!(seq, par);
    }

    #[test]
    fn cancellation_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let cancelable = Sequential.cancelable(token);
        let result = cancelable.try_map_collect(vec![1, 2, 3], |x| Ok::<_, super::Canceled>(x));
        assert!(result.is_err());
    }

    #[test]
    fn collect_from_gathers_pushed_values() {
        let out = Sequential.collect_from::<i32>(|push| {
            for i in 0..5 {
                push(i);
            }
        });
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn fixed_threads_run_executes_block() {
        let pool = super::FixedThreads::new(2);
        assert_eq!(pool.run(|| 1 + 1), 2);
    }

    #[test]
    fn timed_records_nonzero_duration_eventually() {
        let timed = Sequential.timed();
        let _ = timed.map_collect(vec![1, 2, 3], |x| {
            std::thread::sleep(std::time::Duration::from_millis(1));
            x
        });
        assert!(timed.elapsed() > std::time::Duration::ZERO);
    }
}
