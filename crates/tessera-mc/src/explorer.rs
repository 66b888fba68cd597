//! Parallel exhaustive state space exploration.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tessera_store::{
    build_storage, BackendKind, MapStore, StateId, StateStorage, StoreConfig, StoreError,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::frontier::{Frontier, QuitOnPanic, RunPhase};
use crate::model::{Model, ModelContext};
use crate::settings::ConfigError;
use crate::stats::{resident_bytes, GlobalCounters, RunSummary, SizeHistogram, WorkerStats};

/// Capacity of the transition label namespace.
const LABEL_CAPACITY: usize = 1 << 20;

/// Exploration setup error. Nothing fails once workers are running; see
/// [`tessera_store::fatal`].
#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("model '{0}' produced no initial state")]
    NoInitialState(String),
}

pub type ExploreResult<T> = Result<T, ExploreError>;

/// How a run ended.
#[derive(Debug)]
pub enum ExploreOutcome {
    /// The whole reachable state space was explored.
    Complete(RunSummary),
    /// Stopped after `max_states` distinct states.
    StateLimitReached(RunSummary),
    /// Stopped through the stop flag.
    Interrupted(RunSummary),
}

impl ExploreOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            ExploreOutcome::Complete(s)
            | ExploreOutcome::StateLimitReached(s)
            | ExploreOutcome::Interrupted(s) => s,
        }
    }

    pub fn into_summary(self) -> RunSummary {
        match self {
            ExploreOutcome::Complete(s)
            | ExploreOutcome::StateLimitReached(s)
            | ExploreOutcome::Interrupted(s) => s,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ExploreOutcome::Complete(_))
    }
}

/// Work distribution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckerKind {
    /// One worker.
    SingleCoreSimple,
    /// Every new state goes through the central queue.
    MulticoreSimple,
    /// New states stay in the finder's local queue, except every
    /// `publish_every`-th one or when a worker waits for work.
    #[default]
    MulticoreBitBetter,
}

impl CheckerKind {
    pub const ALL: [CheckerKind; 3] = [
        CheckerKind::SingleCoreSimple,
        CheckerKind::MulticoreSimple,
        CheckerKind::MulticoreBitBetter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckerKind::SingleCoreSimple => "singlecore_simple",
            CheckerKind::MulticoreSimple => "multicore_simple",
            CheckerKind::MulticoreBitBetter => "multicore_bitbetter",
        }
    }
}

impl fmt::Display for CheckerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownChecker(s.to_string()))
    }
}

/// Lock-free progress counters shared between the explorer and the CLI.
#[derive(Debug)]
pub struct ProgressCounters {
    /// Distinct states found so far.
    pub states: AtomicUsize,
    /// States expanded so far.
    pub checked: AtomicUsize,
    /// Length of the central queue at its last change.
    pub queue_len: AtomicUsize,
    pub(crate) phase: AtomicU8,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            states: AtomicUsize::new(0),
            checked: AtomicUsize::new(0),
            queue_len: AtomicUsize::new(0),
            phase: AtomicU8::new(RunPhase::Running as u8),
        }
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::load(&self.phase)
    }
}

/// Configuration for the explorer.
#[derive(Debug, Clone)]
pub struct ExploreConfig {
    /// Worker threads (0 = all available cores).
    pub threads: usize,
    pub checker: CheckerKind,
    pub storage: BackendKind,
    pub store: StoreConfig,
    /// Publish every K-th new state to the central queue.
    pub publish_every: usize,
    /// Pin worker `i` to CPU `i` (Linux only).
    pub pin_cpus: bool,
    /// Keep a per-worker breakdown in the summary.
    pub collect_stats: bool,
    /// Record the length of every new state.
    pub collect_histogram: bool,
    /// Stop after this many distinct states (0 = unlimited).
    pub max_states: usize,
    /// Shared progress counters, written by the workers without blocking.
    pub progress: Option<Arc<ProgressCounters>>,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            checker: CheckerKind::default(),
            storage: BackendKind::default(),
            store: StoreConfig::default(),
            publish_every: 32,
            pin_cpus: false,
            collect_stats: true,
            collect_histogram: false,
            max_states: 0,
            progress: None,
        }
    }
}

impl ExploreConfig {
    /// Number of workers the run will use.
    pub fn effective_threads(&self) -> usize {
        match self.checker {
            CheckerKind::SingleCoreSimple => 1,
            _ if self.threads > 0 => self.threads,
            _ => std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }

    pub fn effective_publish_every(&self) -> usize {
        match self.checker {
            CheckerKind::MulticoreSimple => 1,
            _ => self.publish_every.max(1),
        }
    }
}

/// Callback for every reported transition: `(source, label, target)`.
pub type TransitionHook = dyn Fn(StateId, StateId, StateId) + Send + Sync;

/// Run-wide state shared by the workers.
struct RunShared<'r> {
    frontier: &'r Frontier,
    stop: &'r AtomicBool,
    discovered: AtomicUsize,
    limit_hit: AtomicBool,
    counters: GlobalCounters,
    histogram: Mutex<SizeHistogram>,
    per_worker: Mutex<Vec<(usize, WorkerStats)>>,
}

pub struct Explorer<M: Model> {
    model: M,
    config: ExploreConfig,
    store: Box<dyn StateStorage>,
    labels: MapStore,
    stop_flag: Option<Arc<AtomicBool>>,
    hook: Option<Box<TransitionHook>>,
    progress: Arc<ProgressCounters>,
}

impl<M: Model> Explorer<M> {
    /// Build the store for `model` as configured.
    pub fn new(model: M, config: ExploreConfig) -> ExploreResult<Self> {
        let mut store_config = config.store.clone();
        if store_config.fixed_length.is_none() {
            store_config = store_config.with_fixed_length(model.state_length());
        }
        let store = build_storage(config.storage, &store_config)?;
        let progress = config.progress.clone().unwrap_or_default();
        Ok(Self {
            model,
            config,
            store,
            labels: MapStore::with_capacity(LABEL_CAPACITY, None),
            stop_flag: None,
            hook: None,
            progress,
        })
    }

    /// Set an external stop flag; raising it ends the run with
    /// [`ExploreOutcome::Interrupted`].
    pub fn set_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop_flag = Some(flag);
    }

    /// Call `hook(source, label, target)` for every reported successor, new
    /// or not. Runs on the worker threads.
    pub fn set_transition_hook<F>(&mut self, hook: F)
    where
        F: Fn(StateId, StateId, StateId) + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &ExploreConfig {
        &self.config
    }

    /// Get the state store for inspection.
    pub fn store(&self) -> &dyn StateStorage {
        self.store.as_ref()
    }

    pub fn progress(&self) -> &Arc<ProgressCounters> {
        &self.progress
    }

    /// Render a transition label through the model.
    pub fn describe_label(&self, label: StateId) -> String {
        let ctx = ModelContext::new(self.store.as_ref(), &self.labels, 0);
        self.model.transition_info(&ctx, label)
    }

    /// Explore everything reachable from the model's initial state.
    ///
    /// States go into this explorer's store; a second run on the same
    /// explorer finds nothing new.
    pub fn run(&mut self) -> ExploreResult<ExploreOutcome> {
        let threads = self.config.effective_threads();
        let publish_every = self.config.effective_publish_every();
        let pin = self.config.pin_cpus;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tessera-worker-{i}"))
            .start_handler(move |i| {
                if pin {
                    pin_to_cpu(i);
                }
            })
            .build()?;

        info!(
            model = self.model.name(),
            storage = self.store.name(),
            checker = %self.config.checker,
            threads,
            publish_every,
            "starting exploration"
        );

        let start = Instant::now();
        let frontier = Frontier::new(threads, Arc::clone(&self.progress));
        let local_stop = AtomicBool::new(false);
        let stop: &AtomicBool = self.stop_flag.as_deref().unwrap_or(&local_stop);

        let seeds = self.seed()?;
        let shared = RunShared {
            frontier: &frontier,
            stop,
            discovered: AtomicUsize::new(0),
            limit_hit: AtomicBool::new(false),
            counters: GlobalCounters::default(),
            histogram: Mutex::new(SizeHistogram::default()),
            per_worker: Mutex::new(Vec::new()),
        };
        let mut seed_slots = 0u64;
        for seed in &seeds {
            seed_slots += seed.length() as u64;
            if self.config.collect_histogram {
                shared
                    .histogram
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(seed.length());
            }
            frontier.push(*seed);
        }
        shared.discovered.store(seeds.len(), Ordering::Relaxed);
        self.progress.states.store(seeds.len(), Ordering::Relaxed);
        info!(count = seeds.len(), "seeded initial states");

        let this = &*self;
        pool.broadcast(|ctx| this.worker_loop(ctx.index(), publish_every, &shared));
        frontier.mark_stopped();

        let totals = shared.counters.snapshot();
        let mut per_worker = shared
            .per_worker
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        per_worker.sort_by_key(|(i, _)| *i);
        let histogram = shared
            .histogram
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        let summary = RunSummary {
            model: self.model.name().to_string(),
            backend: self.store.name(),
            threads,
            elapsed: start.elapsed(),
            states: seeds.len() as u64 + totals.states,
            transitions: totals.transitions,
            logical_slots: seed_slots + totals.slots,
            totals,
            per_worker: per_worker.into_iter().map(|(_, w)| w).collect(),
            storage: self.store.stats(),
            histogram: self.config.collect_histogram.then_some(histogram),
            resident_bytes: resident_bytes(),
        };
        info!(
            states = summary.states,
            transitions = summary.transitions,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "exploration finished"
        );

        Ok(if stop.load(Ordering::Acquire) {
            info!("interrupted");
            ExploreOutcome::Interrupted(summary)
        } else if shared.limit_hit.load(Ordering::Relaxed) {
            info!(max_states = self.config.max_states, "reached state limit");
            ExploreOutcome::StateLimitReached(summary)
        } else {
            ExploreOutcome::Complete(summary)
        })
    }

    /// Insert the initial states; returns the new ones.
    fn seed(&self) -> ExploreResult<Vec<StateId>> {
        let mut ctx = ModelContext::new(self.store.as_ref(), &self.labels, 0);
        let returned = self.model.initial(&mut ctx);
        let recorded = ctx.take_initial();
        if recorded.is_empty() {
            if !returned.exists() {
                return Err(ExploreError::NoInitialState(self.model.name().to_string()));
            }
            return Ok(vec![returned]);
        }
        let mut seeds: Vec<StateId> = recorded
            .into_iter()
            .filter(|ins| ins.inserted)
            .map(|ins| ins.state)
            .collect();
        seeds.dedup();
        Ok(seeds)
    }

    fn worker_loop(&self, worker: usize, publish_every: usize, shared: &RunShared<'_>) {
        let frontier = shared.frontier;
        let _guard = QuitOnPanic(frontier);
        let mut ctx = ModelContext::new(self.store.as_ref(), &self.labels, worker);
        let mut local: VecDeque<StateId> = VecDeque::new();
        let mut stats = WorkerStats::default();
        let mut histogram = SizeHistogram::default();
        let mut since_publish = 0usize;
        let max_states = self.config.max_states;

        loop {
            if frontier.is_quit() {
                break;
            }
            if shared.stop.load(Ordering::Relaxed) {
                frontier.request_quit();
                break;
            }
            let state = match local.pop_front() {
                Some(state) => {
                    stats.local_pops += 1;
                    state
                }
                None => match frontier.pop(shared.stop, &mut stats.idle_waits) {
                    Some(state) => {
                        stats.central_pops += 1;
                        state
                    }
                    None => break,
                },
            };

            trace!(worker, state = %state, "expanding");
            let reported = self.model.next_all(state, &mut ctx);
            stats.expanded += 1;
            self.progress.checked.fetch_add(1, Ordering::Relaxed);

            let mut batch = ctx.take_transitions();
            debug_assert_eq!(reported, batch.len(), "{}: successor count", self.model.name());
            if batch.is_empty() {
                stats.dead_ends += 1;
            }
            for t in batch.drain(..) {
                stats.transitions += 1;
                if let Some(hook) = &self.hook {
                    hook(state, t.label, t.target.state);
                }
                if !t.target.inserted {
                    continue;
                }
                let len = t.target.state.length();
                stats.states += 1;
                stats.slots += len as u64;
                if self.config.collect_histogram {
                    histogram.record(len);
                }
                let total = shared.discovered.fetch_add(1, Ordering::Relaxed) + 1;
                self.progress.states.store(total, Ordering::Relaxed);
                if max_states > 0 && total >= max_states {
                    shared.limit_hit.store(true, Ordering::Relaxed);
                    frontier.request_quit();
                }

                since_publish += 1;
                if since_publish >= publish_every || frontier.has_waiters() {
                    since_publish = 0;
                    stats.publishes += 1;
                    frontier.push(t.target.state);
                } else {
                    local.push_back(t.target.state);
                }
            }
            ctx.restore(batch);
        }

        stats.cache_hits = ctx.cache().hits();
        stats.cache_misses = ctx.cache().misses();
        debug!(
            worker,
            states = stats.states,
            transitions = stats.transitions,
            expanded = stats.expanded,
            idle_waits = stats.idle_waits,
            abandoned = local.len(),
            "worker finished"
        );

        shared.counters.absorb(&stats);
        if self.config.collect_histogram {
            shared
                .histogram
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .merge(&histogram);
        }
        if self.config.collect_stats {
            shared
                .per_worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((worker, stats));
        }
    }
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(index: usize) {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    // SAFETY: `set` is a plain bitmask owned by this frame; the call only
    // reads it and affects the calling thread.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(index % cpus, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        warn!(worker = index, error = %std::io::Error::last_os_error(), "failed to pin worker");
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(index: usize) {
    debug!(worker = index, "cpu pinning is not supported on this platform");
}
