//! Slot bookkeeping guarded by the pool lock.
//!
//! Three containers:
//! - `free`: reusable slot indices, in reuse order
//! - `open`: slot indices of the currently open begin transitions, outermost first
//! - `allocated`: per-slot mask of clients still working on the slot's content
//!
//! Every slot index lives in exactly one of `free` or `open`. A slot handed out
//! for an end transition stays in `free`: ends are never replayed, so the slot
//! may be reused as soon as its allocated mask drains.

use std::collections::VecDeque;

use crate::client::{ClientId, ClientMask};
use crate::diagnostics::PoolDump;
use crate::error::{PoolError, Result};
use crate::kind::Kind;
use crate::store::TransitionStore;

/// Where a reserved slot ended up relative to the open stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Pushed onto the open stack.
    Opened,
    /// Matching end of the top; `closed` went back to free.
    Closed { closed: usize },
    /// Non-root kind with nothing open. The stack is left alone.
    Detached,
    /// Out-of-order kind; `released` were popped back to free.
    RolledBack { released: Vec<usize>, opened: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reservation {
    pub slot: usize,
    pub placement: Placement,
}

#[derive(Debug)]
pub(crate) struct PoolState {
    pub free: VecDeque<usize>,
    pub open: Vec<usize>,
    pub allocated: Vec<ClientMask>,
    pub behind: ClientMask,
}

impl PoolState {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: (0..capacity).collect(),
            open: Vec::with_capacity(capacity),
            allocated: vec![ClientMask::EMPTY; capacity],
            behind: ClientMask::EMPTY,
        }
    }

    pub fn capacity(&self) -> usize {
        self.allocated.len()
    }

    /// Pick a slot for a new transition of `kind` and update the open stack.
    ///
    /// Nothing is mutated when the pool is exhausted or the sequence cannot be
    /// recovered.
    pub fn reserve<S: TransitionStore + ?Sized>(
        &mut self,
        kind: Kind,
        root: Kind,
        cycle: Kind,
        kinds: &S,
    ) -> Result<Reservation> {
        let Some(pos) = self
            .free
            .iter()
            .position(|&slot| self.allocated[slot].is_empty())
        else {
            return Err(PoolError::Exhausted);
        };
        let slot = self.free[pos];

        let Some(&top_slot) = self.open.last() else {
            let placement = if kind == root {
                self.open_slot(pos);
                Placement::Opened
            } else {
                Placement::Detached
            };
            if kind.is_begin() {
                self.mark_behind(slot, cycle, kinds);
            }
            return Ok(Reservation { slot, placement });
        };

        let top = kinds.kind(top_slot);
        let placement = if kind.is_begin() && kind.nests_in(top) {
            self.open_slot(pos);
            Placement::Opened
        } else if kind.closes(top) {
            self.open.pop();
            self.free.push_back(top_slot);
            Placement::Closed { closed: top_slot }
        } else if kind.is_begin() {
            if kind > top {
                return Err(PoolError::Unrecoverable {
                    kind,
                    top,
                    dump: Box::new(PoolDump::capture(self, kinds)),
                });
            }
            let released = self.unwind(kinds, |open| open >= kind);
            // Unwinding only appends to `free`, so `pos` still points at `slot`.
            self.open_slot(pos);
            Placement::RolledBack {
                released,
                opened: true,
            }
        } else {
            let released = self.unwind(kinds, |open| kind.closes_at_or_above(open));
            Placement::RolledBack {
                released,
                opened: false,
            }
        };

        if kind.is_begin() {
            self.mark_behind(slot, cycle, kinds);
        }

        Ok(Reservation { slot, placement })
    }

    pub fn claim<S: TransitionStore + ?Sized>(
        &mut self,
        slot: usize,
        client: ClientId,
        kinds: &S,
    ) -> bool {
        if self.behind.contains(client) {
            let oldest = self
                .allocated
                .iter()
                .enumerate()
                .filter(|(_, mask)| mask.contains(client))
                .map(|(index, _)| kinds.kind(index))
                .filter(|held| held.is_end())
                .min();
            let kind = kinds.kind(slot);
            let in_order = kind.is_end() && oldest.is_none_or(|oldest| kind < oldest);
            if !in_order {
                return false;
            }
        }
        self.allocated[slot].insert(client);
        true
    }

    /// Returns true when a behind client has just drained its last slot.
    pub fn release(&mut self, slot: usize, client: ClientId) -> bool {
        self.allocated[slot].remove(client);
        if !self.behind.contains(client) || self.holds_any(client) {
            return false;
        }
        self.behind.remove(client);
        true
    }

    pub fn retire(&mut self, client: ClientId) {
        self.behind.remove(client);
        for mask in &mut self.allocated {
            mask.remove(client);
        }
    }

    /// Retire stale state for `client`, then hand it every open slot.
    pub fn attach(&mut self, client: ClientId) -> Vec<usize> {
        self.retire(client);
        for &slot in &self.open {
            self.allocated[slot].insert(client);
        }
        self.open.clone()
    }

    pub fn holds_any(&self, client: ClientId) -> bool {
        self.allocated.iter().any(|mask| mask.contains(client))
    }

    fn open_slot(&mut self, pos: usize) {
        if let Some(slot) = self.free.remove(pos) {
            self.open.push(slot);
        }
    }

    fn unwind<S: TransitionStore + ?Sized>(
        &mut self,
        kinds: &S,
        pop_while: impl Fn(Kind) -> bool,
    ) -> Vec<usize> {
        let mut released = Vec::new();
        while let Some(&top) = self.open.last() {
            if !pop_while(kinds.kind(top)) {
                break;
            }
            self.open.pop();
            self.free.push_back(top);
            released.push(top);
        }
        released
    }

    fn mark_behind<S: TransitionStore + ?Sized>(&mut self, slot: usize, cycle: Kind, kinds: &S) {
        for (index, mask) in self.allocated.iter().enumerate() {
            if index != slot && !mask.is_empty() && kinds.kind(index) == cycle {
                self.behind.union(*mask);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KindTable;

    const ROOT: Kind = Kind::MAP;
    const CYCLE: Kind = Kind::ENABLE;

    struct Harness {
        state: PoolState,
        table: KindTable,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            Self {
                state: PoolState::new(capacity),
                table: KindTable::new(capacity),
            }
        }

        /// Reserve and write, the way a producer does.
        fn publish(&mut self, kind: Kind) -> Reservation {
            let reservation = self
                .state
                .reserve(kind, ROOT, CYCLE, &self.table)
                .expect("reservation");
            self.table.write(reservation.slot, kind);
            reservation
        }

        fn open_kinds(&self) -> Vec<Kind> {
            self.state
                .open
                .iter()
                .map(|&slot| self.table.kind(slot))
                .collect()
        }

        fn claim(&mut self, slot: usize, client: ClientId) -> bool {
            self.state.claim(slot, client, &self.table)
        }
    }

    fn client(id: u32) -> ClientId {
        ClientId::new(id).unwrap()
    }

    fn open_to_enable(h: &mut Harness) -> usize {
        h.publish(Kind::MAP);
        h.publish(Kind::CONFIGURE);
        h.publish(Kind::BEGIN_RUN);
        h.publish(Kind::BEGIN_CALIB_CYCLE);
        h.publish(Kind::ENABLE).slot
    }

    #[test]
    fn begin_and_end_round_trip() {
        let mut h = Harness::new(4);

        let map = h.publish(Kind::MAP);
        assert_eq!(map.placement, Placement::Opened);
        let configure = h.publish(Kind::CONFIGURE);
        assert_eq!(configure.placement, Placement::Opened);
        assert_eq!(h.state.open, vec![map.slot, configure.slot]);

        let unconfigure = h.publish(Kind::UNCONFIGURE);
        assert_eq!(
            unconfigure.placement,
            Placement::Closed {
                closed: configure.slot
            }
        );
        assert!(h.state.free.contains(&unconfigure.slot));
        assert_eq!(h.state.open, vec![map.slot]);

        let unmap = h.publish(Kind::UNMAP);
        assert_eq!(unmap.placement, Placement::Closed { closed: map.slot });
        assert!(h.state.open.is_empty());
        assert_eq!(h.state.free.len(), 4);
    }

    #[test]
    fn end_slot_is_reusable_immediately() {
        let mut h = Harness::new(2);
        h.publish(Kind::MAP);
        let unmap = h.publish(Kind::UNMAP);
        // Free order is [unmap slot, map slot]; the end's slot comes first.
        let again = h.publish(Kind::MAP);
        assert_eq!(again.slot, unmap.slot);
    }

    #[test]
    fn exhausted_pool_mutates_nothing() {
        let mut h = Harness::new(2);
        let map = h.publish(Kind::MAP);
        let unmap = h.publish(Kind::UNMAP);
        h.claim(map.slot, client(0));
        h.claim(unmap.slot, client(1));

        let free_before = h.state.free.clone();
        let open_before = h.state.open.clone();
        let result = h.state.reserve(Kind::MAP, ROOT, CYCLE, &h.table);
        assert!(matches!(result, Err(PoolError::Exhausted)));
        assert_eq!(h.state.free, free_before);
        assert_eq!(h.state.open, open_before);
    }

    #[test]
    fn busy_free_slots_are_skipped() {
        let mut h = Harness::new(3);
        let map = h.publish(Kind::MAP);
        let unmap = h.publish(Kind::UNMAP);
        h.claim(unmap.slot, client(0));
        h.claim(map.slot, client(0));

        let next = h.publish(Kind::MAP);
        assert_ne!(next.slot, unmap.slot);
        assert_ne!(next.slot, map.slot);
    }

    #[test]
    fn non_root_on_empty_stack_is_detached() {
        let mut h = Harness::new(2);
        let reservation = h.publish(Kind::CONFIGURE);
        assert_eq!(reservation.placement, Placement::Detached);
        assert!(h.state.open.is_empty());
        assert_eq!(h.state.free.len(), 2);
    }

    #[test]
    fn begin_above_top_is_unrecoverable() {
        let mut h = Harness::new(4);
        h.publish(Kind::MAP);
        h.publish(Kind::CONFIGURE);

        let err = h
            .state
            .reserve(Kind::BEGIN_CALIB_CYCLE, ROOT, CYCLE, &h.table)
            .unwrap_err();
        match err {
            PoolError::Unrecoverable { kind, top, dump } => {
                assert_eq!(kind, Kind::BEGIN_CALIB_CYCLE);
                assert_eq!(top, Kind::CONFIGURE);
                assert_eq!(dump.open.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.open_kinds(), vec![Kind::MAP, Kind::CONFIGURE]);
    }

    #[test]
    fn repeated_begin_rolls_back_to_its_level() {
        let mut h = Harness::new(8);
        open_to_enable(&mut h);

        let again = h.publish(Kind::BEGIN_RUN);
        match again.placement {
            Placement::RolledBack { released, opened } => {
                assert_eq!(released.len(), 3);
                assert!(opened);
            }
            other => panic!("unexpected placement: {other:?}"),
        }
        assert_eq!(
            h.open_kinds(),
            vec![Kind::MAP, Kind::CONFIGURE, Kind::BEGIN_RUN]
        );
        assert_eq!(h.state.open.last(), Some(&again.slot));
        assert_eq!(h.state.free.len() + h.state.open.len(), 8);
    }

    #[test]
    fn skipped_end_closes_its_level_and_deeper() {
        let mut h = Harness::new(8);
        open_to_enable(&mut h);

        // EndRun while Enable is on top: Enable, BeginCalibCycle and BeginRun all close.
        let end_run = h.publish(Kind::END_RUN);
        assert!(matches!(
            end_run.placement,
            Placement::RolledBack { ref released, opened: false } if released.len() == 3
        ));
        assert_eq!(h.open_kinds(), vec![Kind::MAP, Kind::CONFIGURE]);
        assert!(h.state.free.contains(&end_run.slot));
    }

    #[test]
    fn end_deeper_than_top_leaves_stack_alone() {
        let mut h = Harness::new(4);
        h.publish(Kind::MAP);
        h.publish(Kind::CONFIGURE);

        let disable = h.publish(Kind::DISABLE);
        assert_eq!(
            disable.placement,
            Placement::RolledBack {
                released: vec![],
                opened: false
            }
        );
        assert_eq!(h.open_kinds(), vec![Kind::MAP, Kind::CONFIGURE]);
    }

    #[test]
    fn new_cycle_marks_lagging_clients_behind() {
        let mut h = Harness::new(8);
        let enable = open_to_enable(&mut h);
        h.claim(enable, client(1));
        h.claim(enable, client(2));
        h.state.release(enable, client(2));

        h.publish(Kind::DISABLE);
        h.publish(Kind::ENABLE);

        assert!(h.state.behind.contains(client(1)));
        assert!(!h.state.behind.contains(client(2)));
    }

    #[test]
    fn behind_client_catches_up_in_order() {
        let mut h = Harness::new(10);
        let enable = open_to_enable(&mut h);
        h.claim(enable, client(0));
        let disable = h.publish(Kind::DISABLE).slot;
        h.claim(disable, client(0));
        let end_cycle = h.publish(Kind::END_CALIB_CYCLE).slot;
        // Another client keeps the end's slot from being reused.
        h.claim(end_cycle, client(9));
        h.publish(Kind::BEGIN_CALIB_CYCLE);
        let enable_again = h.publish(Kind::ENABLE).slot;
        assert!(h.state.behind.contains(client(0)));

        // Holding Disable: deeper or equal ends and any begin are refused.
        assert!(!h.claim(enable_again, client(0)));
        let disable_again = h.publish(Kind::DISABLE).slot;
        assert!(!h.claim(disable_again, client(0)));
        // EndCalibCycle is shallower than the held Disable.
        assert!(h.claim(end_cycle, client(0)));
    }

    #[test]
    fn release_reports_ready_exactly_once() {
        let mut h = Harness::new(8);
        let enable = open_to_enable(&mut h);
        h.claim(enable, client(0));
        let disable = h.publish(Kind::DISABLE).slot;
        h.claim(disable, client(0));
        h.publish(Kind::ENABLE);
        assert!(h.state.behind.contains(client(0)));

        assert!(!h.state.release(enable, client(0)));
        assert!(h.state.release(disable, client(0)));
        assert!(!h.state.behind.contains(client(0)));
        assert!(!h.state.release(disable, client(0)));
    }

    #[test]
    fn release_without_behind_is_false() {
        let mut h = Harness::new(2);
        let map = h.publish(Kind::MAP).slot;
        assert!(h.claim(map, client(5)));
        assert!(!h.state.release(map, client(5)));
        assert!(h.state.allocated[map].is_empty());
    }

    #[test]
    fn retire_clears_every_trace_of_a_client() {
        let mut h = Harness::new(8);
        let enable = open_to_enable(&mut h);
        h.claim(enable, client(3));
        h.claim(enable, client(4));
        let disable = h.publish(Kind::DISABLE).slot;
        h.claim(disable, client(3));
        h.publish(Kind::ENABLE);
        assert!(h.state.behind.contains(client(3)));

        h.state.retire(client(3));
        assert!(!h.state.behind.contains(client(3)));
        assert!(!h.state.holds_any(client(3)));
        assert!(h.state.allocated[enable].contains(client(4)));
    }

    #[test]
    fn attach_hands_out_open_slots() {
        let mut h = Harness::new(8);
        h.publish(Kind::MAP);
        h.publish(Kind::CONFIGURE);
        let stale = h.publish(Kind::UNCONFIGURE).slot;
        h.claim(stale, client(7));
        h.publish(Kind::CONFIGURE);

        let replay = h.state.attach(client(7));
        assert_eq!(replay, h.state.open);
        assert!(replay.iter().all(|&slot| h.state.allocated[slot].contains(client(7))));
        assert!(!h.state.allocated[stale].contains(client(7)));
    }
}
