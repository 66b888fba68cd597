//! Central work queue and termination detection.
//!
//! Workers keep private queues and only come here when theirs runs dry (or to
//! publish work for others). A worker that finds the central queue empty
//! registers as idle and waits on the condition variable; when every worker
//! is idle at once, no work exists anywhere and the run is over.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tessera_store::StateId;
use tracing::debug;

use crate::explorer::ProgressCounters;

/// How often a waiting worker re-checks the stop flag.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Global life cycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunPhase {
    Running = 0,
    /// Workers have been told to quit and are draining out.
    Terminating = 1,
    Stopped = 2,
}

impl RunPhase {
    pub(crate) fn store(self, cell: &AtomicU8) {
        cell.store(self as u8, Ordering::Release);
    }

    pub(crate) fn load(cell: &AtomicU8) -> Self {
        match cell.load(Ordering::Acquire) {
            0 => RunPhase::Running,
            1 => RunPhase::Terminating,
            _ => RunPhase::Stopped,
        }
    }
}

struct Shared {
    queue: VecDeque<StateId>,
    idle: usize,
    quit: bool,
}

pub struct Frontier {
    shared: Mutex<Shared>,
    wake: Condvar,
    workers: usize,
    /// Mirror of `Shared::idle`, readable without the lock.
    waiting: AtomicUsize,
    /// Mirror of `Shared::quit`.
    quit: AtomicBool,
    progress: Arc<ProgressCounters>,
}

impl Frontier {
    pub fn new(workers: usize, progress: Arc<ProgressCounters>) -> Self {
        assert!(workers > 0, "frontier needs at least one worker");
        RunPhase::Running.store(&progress.phase);
        Self {
            shared: Mutex::new(Shared {
                queue: VecDeque::new(),
                idle: 0,
                quit: false,
            }),
            wake: Condvar::new(),
            workers,
            waiting: AtomicUsize::new(0),
            quit: AtomicBool::new(false),
            progress,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, state: StateId) {
        let mut shared = self.lock();
        shared.queue.push_back(state);
        self.progress
            .queue_len
            .store(shared.queue.len(), Ordering::Relaxed);
        if shared.idle > 0 {
            self.wake.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether some worker is blocked waiting for work.
    #[inline]
    pub fn has_waiters(&self) -> bool {
        self.waiting.load(Ordering::Relaxed) > 0
    }

    #[inline]
    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Stop the run: every worker returns from [`Self::pop`] with `None`.
    pub fn request_quit(&self) {
        let mut shared = self.lock();
        self.quit_locked(&mut shared);
    }

    fn quit_locked(&self, shared: &mut Shared) {
        if !shared.quit {
            shared.quit = true;
            self.quit.store(true, Ordering::Release);
            RunPhase::Terminating.store(&self.progress.phase);
        }
        self.wake.notify_all();
    }

    /// Take work from the central queue, waiting while other workers may
    /// still produce some. Returns `None` once the run is over: all workers
    /// idle, a quit was requested, or `stop` was raised.
    pub fn pop(&self, stop: &AtomicBool, idle_waits: &mut u64) -> Option<StateId> {
        let mut shared = self.lock();
        loop {
            if shared.quit {
                return None;
            }
            if let Some(state) = shared.queue.pop_front() {
                self.progress
                    .queue_len
                    .store(shared.queue.len(), Ordering::Relaxed);
                return Some(state);
            }
            if stop.load(Ordering::Acquire) {
                debug!("stop flag raised");
                self.quit_locked(&mut shared);
                return None;
            }

            shared.idle += 1;
            self.waiting.store(shared.idle, Ordering::Relaxed);
            if shared.idle == self.workers {
                debug!(workers = self.workers, "all workers idle, terminating");
                self.quit_locked(&mut shared);
                return None;
            }

            *idle_waits += 1;
            let (guard, _) = self
                .wake
                .wait_timeout(shared, STOP_POLL)
                .unwrap_or_else(PoisonError::into_inner);
            shared = guard;
            // Spurious and timed-out wake-ups just re-check.
            shared.idle -= 1;
            self.waiting.store(shared.idle, Ordering::Relaxed);
        }
    }

    pub(crate) fn mark_stopped(&self) {
        RunPhase::Stopped.store(&self.progress.phase);
    }
}

/// Quits the frontier if the owning worker unwinds, so that the others do
/// not wait for it forever.
pub(crate) struct QuitOnPanic<'a>(pub &'a Frontier);

impl Drop for QuitOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.request_quit();
        }
    }
}
