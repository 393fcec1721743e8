//! Bounded pools of background tasks.
//!
//! Remote write-backs and inbound message dispatch each run on their own
//! pool so that neither can starve the other, and neither ever blocks the
//! task that submitted work.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{watch, Notify, Semaphore};

/// Number of ordering lanes shared by all keys of a pool.
const ORDER_SHARDS: usize = 32;

/// Completion signal of the last task submitted to a lane.
type Tail = Option<watch::Receiver<bool>>;

/// Semaphore-bounded set of tokio tasks.
///
/// [`TaskPool::spawn`] returns immediately; the spawned task waits for a
/// permit before running, so at most `size` submitted futures make
/// progress at the same time. Cloning a pool shares its permits.
///
/// Plain spawns run in any order. [`TaskPool::spawn_ordered`] tasks that
/// share a key run one after another in submission order, and
/// [`TaskPool::spawn_barrier`] runs after every ordered task submitted
/// before it.
#[derive(Debug, Clone)]
pub struct TaskPool {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    idle: Notify,
    lanes: Vec<Mutex<Tail>>,
}

/// Decrements the in-flight counter when a spawned task ends, even by panic.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TaskPool {
    /// Creates a pool running at most `size` tasks concurrently.
    ///
    /// A size of zero is treated as one.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                size,
                permits: Arc::new(Semaphore::new(size)),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                lanes: (0..ORDER_SHARDS).map(|_| Mutex::new(None)).collect(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Submits a fire-and-forget task without waiting for a permit.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_after(Vec::new(), None, task);
    }

    /// Submits a task that starts only after every earlier task with the
    /// same `key` has finished.
    ///
    /// Keys hash onto a fixed set of lanes, so unrelated keys may also
    /// wait on each other.
    pub fn spawn_ordered<F>(&self, key: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done, signal) = watch::channel(false);
        let previous = self.push_tail(lane_for(key), signal);
        self.spawn_after(previous.into_iter().collect(), Some(done), task);
    }

    /// Submits a task ordered after every earlier ordered task, on every
    /// key. Ordered tasks submitted later wait for it.
    pub fn spawn_barrier<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done, signal) = watch::channel(false);
        let previous = (0..self.inner.lanes.len())
            .filter_map(|lane| self.push_tail(lane, signal.clone()))
            .collect();
        self.spawn_after(previous, Some(done), task);
    }

    /// Makes `signal` the lane's tail and returns the one it replaced.
    fn push_tail(&self, lane: usize, signal: watch::Receiver<bool>) -> Tail {
        let mut tail = self.inner.lanes[lane]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tail.replace(signal)
    }

    fn spawn_after<F>(
        &self,
        previous: Vec<watch::Receiver<bool>>,
        done: Option<watch::Sender<bool>>,
        task: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(&self.inner));
        let permits = Arc::clone(&self.inner.permits);

        tokio::spawn(async move {
            let _guard = guard;
            // A dropped sender means the predecessor ended, by panic or not.
            for mut signal in previous {
                let _ = signal.wait_for(|finished| *finished).await;
            }
            // Predecessors are awaited before taking a permit so a waiting
            // task never holds one.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
            if let Some(done) = done {
                let _ = done.send(true);
            }
        });
    }

    /// Runs a future on the current task while holding a permit.
    ///
    /// Used where ordering matters: the caller awaits completion before
    /// submitting the next item.
    pub async fn run<F, T>(&self, task: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.inner.permits.acquire().await.ok()?;
        Some(task.await)
    }

    /// Waits until every spawned task has finished.
    pub async fn drain(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

fn lane_for(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % ORDER_SHARDS as u64) as usize
}
