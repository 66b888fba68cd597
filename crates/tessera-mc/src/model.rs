//! The interface between a transition system and the explorer.

use tessera_store::{
    Delta, FullState, InsertedState, MapStore, Slot, StateId, StateStorage, WorkerCache,
};

/// A transition system over slot vectors.
///
/// Implementations generate states through the [`ModelContext`] they are
/// handed; the context inserts them into the run's store.
pub trait Model: Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Length every state has, or 0 if states vary in length.
    fn state_length(&self) -> usize {
        0
    }

    /// Insert the initial state through [`ModelContext::insert_initial`] and
    /// return its id.
    fn initial(&self, ctx: &mut ModelContext<'_>) -> StateId;

    /// Report every successor of `state` through [`ModelContext::successor`]
    /// or [`ModelContext::successor_delta`]. Returns the number reported.
    fn next_all(&self, state: StateId, ctx: &mut ModelContext<'_>) -> usize;

    /// Human-readable form of a transition label.
    fn transition_info(&self, ctx: &ModelContext<'_>, label: StateId) -> String {
        if !label.exists() {
            return "-".to_string();
        }
        ctx.label_slots(label).to_string()
    }
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn state_length(&self) -> usize {
        (**self).state_length()
    }

    fn initial(&self, ctx: &mut ModelContext<'_>) -> StateId {
        (**self).initial(ctx)
    }

    fn next_all(&self, state: StateId, ctx: &mut ModelContext<'_>) -> usize {
        (**self).next_all(state, ctx)
    }

    fn transition_info(&self, ctx: &ModelContext<'_>, label: StateId) -> String {
        (**self).transition_info(ctx, label)
    }
}

/// One reported successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Label id, or [`StateId::NOT_FOUND`] for an unlabelled transition.
    pub label: StateId,
    pub target: InsertedState,
}

/// Per-worker handle through which a model reads and produces states.
pub struct ModelContext<'a> {
    store: &'a dyn StateStorage,
    labels: &'a MapStore,
    worker: usize,
    cache: WorkerCache,
    use_cache: bool,
    pending: Vec<Transition>,
    initial: Vec<InsertedState>,
}

impl<'a> ModelContext<'a> {
    pub fn new(store: &'a dyn StateStorage, labels: &'a MapStore, worker: usize) -> Self {
        Self {
            store,
            labels,
            worker,
            cache: store.thread_init(worker),
            use_cache: store.needs_thread_init(),
            pending: Vec::new(),
            initial: Vec::new(),
        }
    }

    /// Index of the worker owning this context.
    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    #[inline]
    pub fn read(&self, state: StateId) -> FullState<'a> {
        self.store.get(state, true)
    }

    /// Copy `out.len()` slots of `state` starting at `offset`.
    #[inline]
    pub fn read_partial(&self, state: StateId, offset: usize, out: &mut [Slot]) -> bool {
        self.store.get_partial(state, offset, out, true)
    }

    /// Intern a transition label.
    #[inline]
    pub fn label(&self, slots: &[Slot]) -> StateId {
        self.labels.insert(slots, true).state
    }

    pub fn label_slots(&self, label: StateId) -> FullState<'a> {
        self.labels.get(label, true)
    }

    pub fn insert_initial(&mut self, slots: &[Slot]) -> StateId {
        let ins = self.store.insert(slots, true);
        self.initial.push(ins);
        ins.state
    }

    /// Report a successor given in full.
    pub fn successor(&mut self, label: StateId, slots: &[Slot]) -> StateId {
        let target = self.store.insert(slots, true);
        self.pending.push(Transition { label, target });
        target.state
    }

    /// Report a successor as a modification of `base`.
    pub fn successor_delta(
        &mut self,
        label: StateId,
        base: StateId,
        delta: &Delta<'_>,
    ) -> StateId {
        let target = if self.use_cache {
            self.store.insert_delta_cached(&mut self.cache, base, delta, true)
        } else {
            self.store.insert_delta(base, delta, true)
        };
        self.pending.push(Transition { label, target });
        target.state
    }

    /// [`Self::successor_delta`] from a raw slice.
    #[inline]
    pub fn successor_patch(
        &mut self,
        label: StateId,
        base: StateId,
        offset: usize,
        data: &[Slot],
    ) -> StateId {
        self.successor_delta(label, base, &Delta::new(offset, data))
    }

    /// Successors reported since the last call. Hand the buffer back with
    /// [`Self::restore`] to reuse its allocation.
    pub(crate) fn take_transitions(&mut self) -> Vec<Transition> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn restore(&mut self, mut buffer: Vec<Transition>) {
        buffer.clear();
        if self.pending.is_empty() {
            self.pending = buffer;
        }
    }

    pub(crate) fn take_initial(&mut self) -> Vec<InsertedState> {
        std::mem::take(&mut self.initial)
    }

    pub(crate) fn cache(&self) -> &WorkerCache {
        &self.cache
    }
}
