//! Exploration statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use memory_stats::memory_stats;
use tessera_store::StorageStats;

/// Returns the resident set size of the process in bytes, if available.
pub fn resident_bytes() -> Option<usize> {
    memory_stats().map(|stats| stats.physical_mem)
}

/// Counters owned by one worker. Plain integers, folded into
/// [`GlobalCounters`] when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// New states this worker inserted.
    pub states: u64,
    /// Successors reported, new or not.
    pub transitions: u64,
    /// Logical slots of the new states.
    pub slots: u64,
    /// States expanded.
    pub expanded: u64,
    /// Expanded states without successors.
    pub dead_ends: u64,
    pub local_pops: u64,
    pub central_pops: u64,
    /// New states handed to the central queue.
    pub publishes: u64,
    /// Times the worker blocked on the frontier.
    pub idle_waits: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.states += other.states;
        self.transitions += other.transitions;
        self.slots += other.slots;
        self.expanded += other.expanded;
        self.dead_ends += other.dead_ends;
        self.local_pops += other.local_pops;
        self.central_pops += other.central_pops;
        self.publishes += other.publishes;
        self.idle_waits += other.idle_waits;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
    }
}

/// Run-wide totals. Relaxed atomics: only read after the workers joined.
#[derive(Debug, Default)]
pub struct GlobalCounters {
    states: AtomicU64,
    transitions: AtomicU64,
    slots: AtomicU64,
    expanded: AtomicU64,
    dead_ends: AtomicU64,
    local_pops: AtomicU64,
    central_pops: AtomicU64,
    publishes: AtomicU64,
    idle_waits: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl GlobalCounters {
    pub fn absorb(&self, w: &WorkerStats) {
        let add = |counter: &AtomicU64, v: u64| {
            counter.fetch_add(v, Ordering::Relaxed);
        };
        add(&self.states, w.states);
        add(&self.transitions, w.transitions);
        add(&self.slots, w.slots);
        add(&self.expanded, w.expanded);
        add(&self.dead_ends, w.dead_ends);
        add(&self.local_pops, w.local_pops);
        add(&self.central_pops, w.central_pops);
        add(&self.publishes, w.publishes);
        add(&self.idle_waits, w.idle_waits);
        add(&self.cache_hits, w.cache_hits);
        add(&self.cache_misses, w.cache_misses);
    }

    pub fn snapshot(&self) -> WorkerStats {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        WorkerStats {
            states: get(&self.states),
            transitions: get(&self.transitions),
            slots: get(&self.slots),
            expanded: get(&self.expanded),
            dead_ends: get(&self.dead_ends),
            local_pops: get(&self.local_pops),
            central_pops: get(&self.central_pops),
            publishes: get(&self.publishes),
            idle_waits: get(&self.idle_waits),
            cache_hits: get(&self.cache_hits),
            cache_misses: get(&self.cache_misses),
        }
    }
}

/// Count of new states per length in slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeHistogram {
    counts: BTreeMap<usize, u64>,
}

impl SizeHistogram {
    #[inline]
    pub fn record(&mut self, len: usize) {
        *self.counts.entry(len).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &SizeHistogram) {
        for (&len, &n) in &other.counts {
            *self.counts.entry(len).or_insert(0) += n;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, len: usize) -> u64 {
        self.counts.get(&len).copied().unwrap_or(0)
    }

    /// `(length, count)` in increasing length.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().map(|(&len, &n)| (len, n))
    }
}

impl fmt::Display for SizeHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total().max(1);
        for (len, n) in self.iter() {
            writeln!(
                f,
                "  {len:>8} slots: {n:>12} ({:.1}%)",
                n as f64 * 100.0 / total as f64
            )?;
        }
        Ok(())
    }
}

/// Everything reported at the end of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub model: String,
    pub backend: &'static str,
    pub threads: usize,
    pub elapsed: Duration,
    /// Distinct states, including the initial ones.
    pub states: u64,
    pub transitions: u64,
    /// Logical slots over all distinct states.
    pub logical_slots: u64,
    pub totals: WorkerStats,
    /// Per-worker breakdown, when statistics are collected.
    pub per_worker: Vec<WorkerStats>,
    pub storage: StorageStats,
    pub histogram: Option<SizeHistogram>,
    pub resident_bytes: Option<usize>,
}

impl RunSummary {
    pub fn states_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.states as f64 / secs
        } else {
            0.0
        }
    }

    /// Logical bytes over bytes the store actually uses.
    pub fn compression_ratio(&self) -> f64 {
        if self.storage.bytes_used == 0 {
            return 0.0;
        }
        (self.logical_slots * std::mem::size_of::<tessera_store::Slot>() as u64) as f64
            / self.storage.bytes_used as f64
    }
}

fn mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model:        {}", self.model)?;
        writeln!(f, "storage:      {}", self.backend)?;
        writeln!(f, "threads:      {}", self.threads)?;
        writeln!(f, "states:       {}", self.states)?;
        writeln!(f, "transitions:  {}", self.transitions)?;
        writeln!(f, "dead ends:    {}", self.totals.dead_ends)?;
        writeln!(
            f,
            "time:         {:.3}s ({:.0} states/s)",
            self.elapsed.as_secs_f64(),
            self.states_per_sec()
        )?;
        writeln!(
            f,
            "memory:       {:.1} MiB used, {:.1} MiB reserved, compression {:.2}x",
            mib(self.storage.bytes_used),
            mib(self.storage.bytes_reserved),
            self.compression_ratio()
        )?;
        writeln!(
            f,
            "tables:       {} roots, {} sub-states, max fill {:.1}%",
            self.storage.root_entries,
            self.storage.sub_entries,
            self.storage.max_fill * 100.0
        )?;
        if let Some(rss) = self.resident_bytes {
            writeln!(f, "resident:     {:.1} MiB", mib(rss))?;
        }
        if !self.per_worker.is_empty() {
            writeln!(
                f,
                "queues:       {} local pops, {} central pops, {} published, {} idle waits",
                self.totals.local_pops,
                self.totals.central_pops,
                self.totals.publishes,
                self.totals.idle_waits
            )?;
            for (i, w) in self.per_worker.iter().enumerate() {
                writeln!(
                    f,
                    "  worker {i:>3}: {} states, {} transitions, {} expanded",
                    w.states, w.transitions, w.expanded
                )?;
            }
        }
        if let Some(hist) = self.histogram.as_ref().filter(|h| !h.is_empty()) {
            writeln!(f, "state lengths:")?;
            write!(f, "{hist}")?;
        }
        Ok(())
    }
}
