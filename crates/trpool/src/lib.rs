//! trpool: a fixed pool of transition-record slots.
//!
//! A producer announces nested begin/end transitions and reserves a slot for
//! each; clients claim and release slots as they process them. Open begin
//! transitions stay pinned so late-joining clients can replay them, and
//! clients that fall a cycle behind are held to in-order catch-up.

mod claim;
mod client;
mod config;
mod diagnostics;
mod error;
mod kind;
mod pool;
mod state;
mod store;

pub mod fatal;
pub mod logging;

pub use claim::Claim;
pub use client::{ClientId, ClientMask, MAX_CLIENTS};
pub use config::{MAX_CAPACITY, PoolConfig};
pub use diagnostics::{PoolDump, PoolStats, SlotEntry};
pub use error::{PoolError, Result};
pub use kind::{Kind, ParseKindError};
pub use pool::TransitionPool;
pub use store::{KindTable, TransitionStore};
