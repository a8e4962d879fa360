use thiserror::Error;

use crate::diagnostics::PoolDump;
use crate::kind::Kind;

#[derive(Debug, Error)]
pub enum PoolError {
    /// Every free slot still has consumers attached; the producer must stall.
    #[error("no free slot is drained of consumers")]
    Exhausted,

    #[error("slot {slot} is outside the pool (capacity {capacity})")]
    SlotOutOfRange { slot: usize, capacity: usize },

    #[error("client id {0} does not fit the 64-bit client mask")]
    ClientOutOfRange(u32),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("pool lock poisoned: cannot guarantee slot bookkeeping")]
    LockPoisoned,

    /// A begin arrived deeper than anything open can explain. The host must
    /// terminate; see [`crate::fatal`].
    #[error("unrecoverable transition {kind} while {top} is open")]
    Unrecoverable {
        kind: Kind,
        top: Kind,
        dump: Box<PoolDump>,
    },
}

impl PoolError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PoolError::Unrecoverable { .. } | PoolError::LockPoisoned)
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
