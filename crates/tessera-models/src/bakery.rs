//! Lamport's bakery algorithm with a bounded ticket counter.
//!
//! Each process owns a block of three slots: program counter, `choosing`
//! flag and ticket number. Program counters:
//!
//! - `0` idle: start choosing.
//! - `1` choosing: take `1 + max(tickets)`; blocks once that would exceed
//!   `max_ticket`.
//! - `2` waiting: enter once no other process is choosing and every other
//!   holder of a ticket is behind us in `(ticket, pid)` order.
//! - `3` critical: leave and drop the ticket.

use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_mc::{Model, ModelContext};
use tessera_store::{Slot, StateId};

use crate::{ModelArgs, ModelResult};

pub const NAME: &str = "bakery";

const BLOCK: usize = 3;

const IDLE: Slot = 0;
const CHOOSING: Slot = 1;
const WAITING: Slot = 2;
const CRITICAL: Slot = 3;

/// Action taken from each pc.
const ACTIONS: [&str; 4] = ["choose", "ticket", "enter", "exit"];

#[derive(Debug)]
pub struct Bakery {
    procs: usize,
    max_ticket: Slot,
    /// Expanded states with more than one process in its critical section.
    critical_overlaps: AtomicUsize,
}

impl Bakery {
    pub fn new(procs: usize, max_ticket: u32) -> Self {
        assert!(procs > 0, "bakery needs at least one process");
        Self {
            procs,
            max_ticket,
            critical_overlaps: AtomicUsize::new(0),
        }
    }

    pub fn from_args(args: &ModelArgs) -> ModelResult<Self> {
        args.check_known(NAME, &["procs", "max_ticket"])?;
        let procs = args.get_u32("procs", 2, 1, 16)?;
        let max_ticket = args.get_u32("max_ticket", 4, 1, 1 << 16)?;
        Ok(Self::new(procs as usize, max_ticket))
    }

    pub fn procs(&self) -> usize {
        self.procs
    }

    /// Mutual exclusion violations seen so far. Stays 0 for a correct run.
    pub fn critical_overlaps(&self) -> usize {
        self.critical_overlaps.load(Ordering::Relaxed)
    }

    /// May process `i` holding `ticket` enter its critical section?
    fn may_enter(&self, s: &[Slot], i: usize, ticket: Slot) -> bool {
        (0..self.procs).filter(|&j| j != i).all(|j| {
            let choosing = s[BLOCK * j + 1];
            let other = s[BLOCK * j + 2];
            choosing == 0 && (other == 0 || (ticket, i) < (other, j))
        })
    }
}

impl Model for Bakery {
    fn name(&self) -> &str {
        NAME
    }

    fn state_length(&self) -> usize {
        BLOCK * self.procs
    }

    fn initial(&self, ctx: &mut ModelContext<'_>) -> StateId {
        ctx.insert_initial(&vec![0; self.state_length()])
    }

    fn next_all(&self, state: StateId, ctx: &mut ModelContext<'_>) -> usize {
        let full = ctx.read(state);
        let s = full.as_slice();

        let critical = (0..self.procs).filter(|&i| s[BLOCK * i] == CRITICAL).count();
        if critical > 1 {
            self.critical_overlaps.fetch_add(1, Ordering::Relaxed);
        }

        let mut count = 0;
        for i in 0..self.procs {
            let at = BLOCK * i;
            let pc = s[at];
            let ticket = s[at + 2];
            let block = match pc {
                IDLE => Some([CHOOSING, 1, ticket]),
                CHOOSING => {
                    let highest = (0..self.procs).map(|j| s[BLOCK * j + 2]).max();
                    let next = 1 + highest.unwrap_or(0);
                    (next <= self.max_ticket).then_some([WAITING, 0, next])
                }
                WAITING => self.may_enter(s, i, ticket).then_some([CRITICAL, 0, ticket]),
                _ => Some([IDLE, 0, 0]),
            };
            if let Some(block) = block {
                let label = ctx.label(&[pc, i as Slot]);
                ctx.successor_patch(label, state, at, &block);
                count += 1;
            }
        }
        count
    }

    fn transition_info(&self, ctx: &ModelContext<'_>, label: StateId) -> String {
        if !label.exists() {
            return "-".to_string();
        }
        let slots = ctx.label_slots(label);
        match slots.as_slice() {
            [pc, pid] => {
                let action = ACTIONS.get(*pc as usize).copied().unwrap_or("?");
                format!("{action}({pid})")
            }
            other => format!("{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::{build_storage, BackendKind, MapStore, StoreConfig};

    #[test]
    fn test_successors_of_initial_state() {
        let store = build_storage(BackendKind::Cchm, &StoreConfig::small()).unwrap();
        let labels = MapStore::with_capacity(64, None);
        let mut ctx = ModelContext::new(store.as_ref(), &labels, 0);
        let bakery = Bakery::new(2, 4);

        let init = bakery.initial(&mut ctx);
        assert_eq!(ctx.read(init).as_slice(), &[0; 6]);
        assert_eq!(bakery.next_all(init, &mut ctx), 2);

        // Either process starts choosing.
        assert!(store.find(&[1, 1, 0, 0, 0, 0], true).exists());
        assert!(store.find(&[0, 0, 0, 1, 1, 0], true).exists());
        assert_eq!(store.stats().root_entries, 3);

        // Process 0 holds ticket 1; process 1's choosing flag blocks its entry.
        let waiting = ctx.insert_initial(&[2, 0, 1, 1, 1, 0]);
        assert_eq!(bakery.next_all(waiting, &mut ctx), 1);
        assert!(store.find(&[2, 0, 1, 2, 0, 2], true).exists());
    }

    #[test]
    fn test_ticket_bound_blocks_choosing() {
        let store = build_storage(BackendKind::StdMap, &StoreConfig::small()).unwrap();
        let labels = MapStore::with_capacity(64, None);
        let mut ctx = ModelContext::new(store.as_ref(), &labels, 0);
        let bakery = Bakery::new(2, 1);

        // Process 1 holds ticket 1, so process 0 would need ticket 2.
        let s = ctx.insert_initial(&[1, 1, 0, 2, 0, 1]);
        assert_eq!(bakery.next_all(s, &mut ctx), 0);
    }

    #[test]
    fn test_overlap_counter_and_labels() {
        let store = build_storage(BackendKind::Cchm, &StoreConfig::small()).unwrap();
        let labels = MapStore::with_capacity(64, None);
        let mut ctx = ModelContext::new(store.as_ref(), &labels, 0);
        let bakery = Bakery::new(2, 4);

        let broken = ctx.insert_initial(&[3, 0, 1, 3, 0, 2]);
        assert_eq!(bakery.next_all(broken, &mut ctx), 2);
        assert_eq!(bakery.critical_overlaps(), 1);

        let exit = ctx.label(&[CRITICAL, 1]);
        assert_eq!(bakery.transition_info(&ctx, exit), "exit(1)");
        assert_eq!(bakery.transition_info(&ctx, StateId::NOT_FOUND), "-");
    }

    #[test]
    fn test_labels_name_the_action_taken() {
        let store = build_storage(BackendKind::Cchm, &StoreConfig::small()).unwrap();
        let labels = MapStore::with_capacity(64, None);
        let mut ctx = ModelContext::new(store.as_ref(), &labels, 0);
        let bakery = Bakery::new(2, 4);

        let named = |ctx: &mut ModelContext<'_>, pc: Slot, pid: Slot| {
            let label = ctx.label(&[pc, pid]);
            bakery.transition_info(ctx, label)
        };
        assert_eq!(named(&mut ctx, IDLE, 0), "choose(0)");
        assert_eq!(named(&mut ctx, CHOOSING, 1), "ticket(1)");
        assert_eq!(named(&mut ctx, WAITING, 0), "enter(0)");
        assert_eq!(named(&mut ctx, CRITICAL, 0), "exit(0)");
    }
}
