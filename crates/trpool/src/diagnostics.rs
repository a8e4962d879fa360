//! Pool diagnostics: full dumps for the fatal path and counters for health checks.
//!
//! Nothing here feeds back into allocation decisions.

use std::fmt;

use serde::Serialize;

use crate::client::ClientMask;
use crate::kind::Kind;
use crate::state::PoolState;
use crate::store::TransitionStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotEntry {
    pub index: usize,
    pub kind: Kind,
    pub allocated: ClientMask,
}

/// Every slot's kind and allocated mask, plus the open and free collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolDump {
    pub slots: Vec<SlotEntry>,
    /// Outermost first.
    pub open: Vec<usize>,
    /// In reuse order.
    pub free: Vec<usize>,
    pub behind: ClientMask,
}

impl PoolDump {
    pub(crate) fn capture<S: TransitionStore + ?Sized>(state: &PoolState, kinds: &S) -> Self {
        Self {
            slots: state
                .allocated
                .iter()
                .enumerate()
                .map(|(index, allocated)| SlotEntry {
                    index,
                    kind: kinds.kind(index),
                    allocated: *allocated,
                })
                .collect(),
            open: state.open.clone(),
            free: state.free.iter().copied().collect(),
            behind: state.behind,
        }
    }
}

impl fmt::Display for PoolDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "transition pool: {} slots, behind {}",
            self.slots.len(),
            self.behind
        )?;
        for slot in &self.slots {
            writeln!(
                f,
                "  [{}] {} ({}) allocated {}",
                slot.index,
                slot.kind,
                slot.kind.raw(),
                slot.allocated
            )?;
        }
        writeln!(f, "open: {:?}", self.open)?;
        write!(f, "free: {:?}", self.free)
    }
}

/// Occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub open: usize,
    /// Slots with at least one client still attached.
    pub busy: usize,
    pub behind_clients: u32,
}

impl PoolStats {
    pub(crate) fn capture(state: &PoolState) -> Self {
        Self {
            capacity: state.capacity(),
            free: state.free.len(),
            open: state.open.len(),
            busy: state.allocated.iter().filter(|mask| !mask.is_empty()).count(),
            behind_clients: state.behind.len(),
        }
    }
}
