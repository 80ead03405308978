use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Returned by [`WorkerPool::acquire`] when all `max_vus` slots are busy.
/// The caller treats the ticket as dropped; acquisition never blocks or
/// queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool at `max_vus`, iteration dropped")]
pub struct CapacityExceeded;

/// One execution slot. Owned exclusively: a worker is either idle inside the
/// pool or held by exactly one in-flight iteration.
#[derive(Debug)]
pub struct Worker {
    id: u64,
}

impl Worker {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
struct IdleWorker {
    worker: Worker,
    idle_since: Instant,
}

#[derive(Debug)]
struct PoolState {
    /// Most-recently released at the back; acquire reuses warm slots from the
    /// back, reclaim retires cold slots from the front.
    idle: VecDeque<IdleWorker>,
    live: u64,
    next_id: u64,
}

/// Per-scenario worker pool: between `pre_allocated` and `max` live slots.
///
/// `acquire`/`release` are O(1) under a short lock. Idle slots beyond
/// `pre_allocated` are reclaimed lazily once they have sat unused for the
/// idle grace period, so capacity shrinks back after a ramp-down without a
/// background sweeper.
#[derive(Debug)]
pub struct WorkerPool {
    pre_allocated: u64,
    max: u64,
    idle_grace: Duration,
    state: Mutex<PoolState>,
    busy: AtomicU64,
    drained: Notify,
}

impl WorkerPool {
    pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(10);

    pub fn new(pre_allocated: u64, max: u64) -> Self {
        Self::with_idle_grace(pre_allocated, max, Self::DEFAULT_IDLE_GRACE)
    }

    pub fn with_idle_grace(pre_allocated: u64, max: u64, idle_grace: Duration) -> Self {
        let now = Instant::now();
        let idle: VecDeque<IdleWorker> = (1..=pre_allocated)
            .map(|id| IdleWorker {
                worker: Worker { id },
                idle_since: now,
            })
            .collect();

        Self {
            pre_allocated,
            max,
            idle_grace,
            state: Mutex::new(PoolState {
                idle,
                live: pre_allocated,
                next_id: pre_allocated.saturating_add(1),
            }),
            busy: AtomicU64::new(0),
            drained: Notify::new(),
        }
    }

    pub fn max_vus(&self) -> u64 {
        self.max
    }

    pub fn pre_allocated_vus(&self) -> u64 {
        self.pre_allocated
    }

    /// Currently live slots (idle + busy). Never exceeds `max_vus`.
    pub fn live(&self) -> u64 {
        self.state.lock().live
    }

    pub fn busy(&self) -> u64 {
        self.busy.load(Ordering::Acquire)
    }

    /// Take an idle slot, or grow the pool if below `max_vus`.
    pub fn acquire(&self) -> Result<Worker, CapacityExceeded> {
        let mut state = self.state.lock();
        self.reclaim_locked(&mut state);

        if let Some(idle) = state.idle.pop_back() {
            self.busy.fetch_add(1, Ordering::AcqRel);
            return Ok(idle.worker);
        }

        if state.live < self.max {
            state.live += 1;
            let id = state.next_id;
            state.next_id = state.next_id.saturating_add(1);
            self.busy.fetch_add(1, Ordering::AcqRel);
            return Ok(Worker { id });
        }

        Err(CapacityExceeded)
    }

    /// Convenience wrapper returning a guard that releases on drop, so the
    /// slot comes back even when the iteration panics or is aborted.
    pub fn acquire_guard(self: &Arc<Self>) -> Result<WorkerGuard, CapacityExceeded> {
        let worker = self.acquire()?;
        Ok(WorkerGuard {
            pool: self.clone(),
            worker: Some(worker),
        })
    }

    pub fn release(&self, worker: Worker) {
        let mut state = self.state.lock();
        state.idle.push_back(IdleWorker {
            worker,
            idle_since: Instant::now(),
        });
        self.reclaim_locked(&mut state);
        drop(state);

        if self.busy.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn reclaim_locked(&self, state: &mut PoolState) {
        while state.live > self.pre_allocated {
            let Some(oldest) = state.idle.front() else {
                break;
            };
            if oldest.idle_since.elapsed() < self.idle_grace {
                break;
            }
            state.idle.pop_front();
            state.live -= 1;
        }
    }

    /// Wait until no slot is busy.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a release landing in
            // between cannot be missed.
            notified.as_mut().enable();
            if self.busy.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
pub struct WorkerGuard {
    pool: Arc<WorkerPool>,
    worker: Option<Worker>,
}

impl WorkerGuard {
    pub fn id(&self) -> u64 {
        self.worker.as_ref().map(Worker::id).unwrap_or(0)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_idle_then_grows_to_max() {
        let pool = WorkerPool::new(2, 4);
        assert_eq!(pool.live(), 2);

        let a = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        let b = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(pool.live(), 2);

        let c = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        let d = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(pool.live(), 4);
        assert_eq!(pool.busy(), 4);

        assert_eq!(pool.acquire().err(), Some(CapacityExceeded));

        pool.release(a);
        pool.release(b);
        pool.release(c);
        pool.release(d);
        assert_eq!(pool.busy(), 0);
    }

    #[test]
    fn acquire_beyond_max_never_blocks() {
        let pool = WorkerPool::new(1, 1);
        let held = pool.acquire().unwrap_or_else(|e| panic!("{e}"));

        for _ in 0..100 {
            assert_eq!(pool.acquire().err(), Some(CapacityExceeded));
        }

        pool.release(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn idle_slots_above_preallocated_are_reclaimed() {
        let pool = WorkerPool::with_idle_grace(1, 3, Duration::ZERO);

        let a = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        let b = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        let c = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(pool.live(), 3);

        pool.release(a);
        pool.release(b);
        pool.release(c);

        // Zero grace: release reclaims everything above pre_allocated.
        assert_eq!(pool.live(), 1);
        assert_eq!(pool.busy(), 0);
    }

    #[test]
    fn idle_slots_survive_within_grace() {
        let pool = WorkerPool::with_idle_grace(1, 3, Duration::from_secs(60));

        let a = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        let b = pool.acquire().unwrap_or_else(|e| panic!("{e}"));
        pool.release(a);
        pool.release(b);

        assert_eq!(pool.live(), 2);
    }

    #[test]
    fn guard_releases_on_drop() {
        let pool = Arc::new(WorkerPool::new(1, 1));
        {
            let _guard = pool.acquire_guard().unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(pool.busy(), 1);
        }
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test]
    async fn drained_resolves_when_last_worker_returns() {
        let pool = Arc::new(WorkerPool::new(1, 2));
        let a = pool.acquire().unwrap_or_else(|e| panic!("{e}"));

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.drained().await })
        };

        // Give the waiter a chance to park.
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release(a);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap_or_else(|_| panic!("drained did not resolve"))
            .unwrap_or_else(|e| panic!("{e}"));
    }
}
