//! `n` independent counters, each counting from 0 up to `max`.
//!
//! The reachable space is the full grid: `(max + 1)^n` states and
//! `n * max * (max + 1)^(n - 1)` transitions.

use tessera_mc::{Model, ModelContext};
use tessera_store::{Slot, StateId};

use crate::{ModelArgs, ModelResult};

pub const NAME: &str = "counters";

#[derive(Debug, Clone)]
pub struct Counters {
    n: usize,
    max: Slot,
}

impl Counters {
    pub fn new(n: usize, max: u32) -> Self {
        assert!(n > 0, "need at least one counter");
        Self { n, max }
    }

    pub fn from_args(args: &ModelArgs) -> ModelResult<Self> {
        args.check_known(NAME, &["n", "max"])?;
        let n = args.get_u32("n", 3, 1, 64)?;
        let max = args.get_u32("max", 3, 1, u32::MAX - 1)?;
        Ok(Self::new(n as usize, max))
    }

    pub fn expected_states(&self) -> u64 {
        (self.max as u64 + 1).pow(self.n as u32)
    }

    pub fn expected_transitions(&self) -> u64 {
        self.n as u64 * self.max as u64 * (self.max as u64 + 1).pow(self.n as u32 - 1)
    }
}

impl Model for Counters {
    fn name(&self) -> &str {
        NAME
    }

    fn state_length(&self) -> usize {
        self.n
    }

    fn initial(&self, ctx: &mut ModelContext<'_>) -> StateId {
        ctx.insert_initial(&vec![0; self.n])
    }

    fn next_all(&self, state: StateId, ctx: &mut ModelContext<'_>) -> usize {
        let full = ctx.read(state);
        let mut count = 0;
        for (i, &v) in full.as_slice().iter().enumerate() {
            if v < self.max {
                let label = ctx.label(&[i as Slot]);
                ctx.successor_patch(label, state, i, &[v + 1]);
                count += 1;
            }
        }
        count
    }

    fn transition_info(&self, ctx: &ModelContext<'_>, label: StateId) -> String {
        if !label.exists() {
            return "-".to_string();
        }
        match ctx.label_slots(label).as_slice() {
            [i] => format!("inc({i})"),
            other => format!("{other:?}"),
        }
    }
}
