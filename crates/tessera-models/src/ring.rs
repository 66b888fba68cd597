//! A token ring. Slot 0 names the node holding the token, slots `1..=nodes`
//! hold one counter per node modulo `values`. The holder either bumps its
//! counter or passes the token on.

use tessera_mc::{Model, ModelContext};
use tessera_store::{Slot, StateId};

use crate::{ModelArgs, ModelResult};

pub const NAME: &str = "ring";

const BUMP: Slot = 0;
const PASS: Slot = 1;

#[derive(Debug, Clone)]
pub struct Ring {
    nodes: usize,
    values: Slot,
}

impl Ring {
    pub fn new(nodes: usize, values: u32) -> Self {
        assert!(nodes > 0 && values > 0, "ring needs nodes and values");
        Self { nodes, values }
    }

    pub fn from_args(args: &ModelArgs) -> ModelResult<Self> {
        args.check_known(NAME, &["nodes", "values"])?;
        let nodes = args.get_u32("nodes", 4, 1, 64)?;
        let values = args.get_u32("values", 3, 1, 1 << 16)?;
        Ok(Self::new(nodes as usize, values))
    }

    /// `nodes * values^nodes`.
    pub fn expected_states(&self) -> u64 {
        self.nodes as u64 * (self.values as u64).pow(self.nodes as u32)
    }
}

impl Model for Ring {
    fn name(&self) -> &str {
        NAME
    }

    fn state_length(&self) -> usize {
        1 + self.nodes
    }

    fn initial(&self, ctx: &mut ModelContext<'_>) -> StateId {
        ctx.insert_initial(&vec![0; self.state_length()])
    }

    fn next_all(&self, state: StateId, ctx: &mut ModelContext<'_>) -> usize {
        let mut head = [0; 1];
        assert!(ctx.read_partial(state, 0, &mut head), "ring state without a token");
        let token = head[0];
        let at = 1 + token as usize;
        let mut counter = [0; 1];
        assert!(ctx.read_partial(state, at, &mut counter), "ring state too short");

        let bump = ctx.label(&[BUMP, token]);
        ctx.successor_patch(bump, state, at, &[(counter[0] + 1) % self.values]);

        let pass = ctx.label(&[PASS, token]);
        let next = (token + 1) % self.nodes as Slot;
        ctx.successor_patch(pass, state, 0, &[next]);
        2
    }

    fn transition_info(&self, ctx: &ModelContext<'_>, label: StateId) -> String {
        if !label.exists() {
            return "-".to_string();
        }
        match ctx.label_slots(label).as_slice() {
            [BUMP, node] => format!("bump({node})"),
            [PASS, node] => format!("pass({node})"),
            other => format!("{other:?}"),
        }
    }
}
