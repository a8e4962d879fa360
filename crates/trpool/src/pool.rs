//! The transition pool: slot reservation for the producer, claim/release for clients.
//!
//! One mutex serializes every operation, so pool state transitions form a
//! total order consistent with call order. Scans are linear in the slot count
//! and nothing blocks while the lock is held: exhaustion and claim rejection
//! are reported immediately and retry policy belongs to the caller.

use std::sync::{Mutex, MutexGuard};

use crate::claim::Claim;
use crate::client::ClientId;
use crate::config::PoolConfig;
use crate::diagnostics::{PoolDump, PoolStats};
use crate::error::{PoolError, Result};
use crate::kind::Kind;
use crate::state::{Placement, PoolState};
use crate::store::TransitionStore;

pub struct TransitionPool<S> {
    config: PoolConfig,
    store: S,
    state: Mutex<PoolState>,
}

impl<S: TransitionStore> TransitionPool<S> {
    pub fn new(config: PoolConfig, store: S) -> Result<Self> {
        config.validate()?;
        if store.len() < config.capacity {
            return Err(PoolError::InvalidConfig(format!(
                "store holds {} records, pool needs {}",
                store.len(),
                config.capacity
            )));
        }

        Ok(Self {
            config,
            store,
            state: Mutex::new(PoolState::new(config.capacity)),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Kind of the record currently behind `slot`.
    pub fn kind(&self, slot: usize) -> Result<Kind> {
        self.check_slot(slot)?;
        Ok(self.store.kind(slot))
    }

    /// Reserve a slot for the producer to write a transition of `kind` into.
    ///
    /// Fails with [`PoolError::Exhausted`] when every free slot still has
    /// clients attached, and with [`PoolError::Unrecoverable`] when `kind` is
    /// a begin deeper than anything open can explain. Neither failure mutates
    /// the pool.
    pub fn reserve_for_write(&self, kind: Kind) -> Result<usize> {
        let mut state = self.lock()?;
        let result = state.reserve(kind, self.config.root, self.config.cycle, &self.store);
        let reservation = match result {
            Ok(reservation) => reservation,
            Err(PoolError::Exhausted) => {
                tracing::trace!(%kind, "No drained free slot");
                return Err(PoolError::Exhausted);
            }
            Err(PoolError::Unrecoverable { kind, top, dump }) => {
                tracing::error!(%kind, %top, dump = %dump, "Unrecoverable transition sequence");
                return Err(PoolError::Unrecoverable { kind, top, dump });
            }
            Err(e) => return Err(e),
        };

        let slot = reservation.slot;
        match reservation.placement {
            Placement::Opened => {
                tracing::debug!(slot, %kind, depth = state.open.len(), "Opened transition");
            }
            Placement::Closed { closed } => {
                tracing::debug!(slot, %kind, closed, "Closed transition");
            }
            Placement::Detached => {
                tracing::warn!(
                    slot,
                    %kind,
                    root = %self.config.root,
                    "Transition arrived with nothing open; open stack left unchanged"
                );
            }
            Placement::RolledBack { released, opened } => {
                tracing::warn!(
                    slot,
                    %kind,
                    ?released,
                    opened,
                    "Out-of-order transition; rolled back open stack"
                );
            }
        }

        if kind.is_begin() && !state.behind.is_empty() {
            tracing::debug!(behind = %state.behind, "Clients behind");
        }

        Ok(slot)
    }

    /// Ask to work on `slot` for `client`. A refusal is not an error: the
    /// client is behind and `slot` is not its next item in order.
    pub fn claim(&self, slot: usize, client: ClientId) -> Result<bool> {
        self.check_slot(slot)?;
        let mut state = self.lock()?;
        let granted = state.claim(slot, client, &self.store);
        tracing::trace!(slot, %client, granted, "Claim");
        Ok(granted)
    }

    /// Like [`claim`](Self::claim), returning a guard that releases on drop.
    pub fn try_claim(&self, slot: usize, client: ClientId) -> Result<Option<Claim<'_, S>>> {
        if self.claim(slot, client)? {
            Ok(Some(Claim::new(self, slot, client)))
        } else {
            Ok(None)
        }
    }

    /// Drop `client`'s hold on `slot`. Returns true when a behind client has
    /// just drained its last slot and is caught up.
    pub fn release(&self, slot: usize, client: ClientId) -> Result<bool> {
        self.check_slot(slot)?;
        let mut state = self.lock()?;
        let ready = state.release(slot, client);
        if ready {
            tracing::info!(%client, "Client caught up");
        } else {
            tracing::trace!(slot, %client, "Released");
        }
        Ok(ready)
    }

    /// Forget `client` entirely, whatever it still holds.
    ///
    /// The caller must not race a claim for the same id against this call.
    pub fn retire(&self, client: ClientId) -> Result<()> {
        let mut state = self.lock()?;
        let held = state.holds_any(client);
        state.retire(client);
        tracing::info!(%client, held, "Client retired");
        Ok(())
    }

    /// Claim every open slot for a newly attached `client` and return them,
    /// outermost first, for replay. Stale holds from a previous user of the id
    /// are dropped first.
    pub fn attach(&self, client: ClientId) -> Result<Vec<usize>> {
        let mut state = self.lock()?;
        let replay = state.attach(client);
        tracing::info!(%client, replay = replay.len(), "Client attached");
        Ok(replay)
    }

    /// Open slots, outermost first.
    pub fn snapshot(&self) -> Result<Vec<usize>> {
        Ok(self.lock()?.open.clone())
    }

    pub fn dump(&self) -> Result<PoolDump> {
        let state = self.lock()?;
        Ok(PoolDump::capture(&state, &self.store))
    }

    pub fn stats(&self) -> Result<PoolStats> {
        Ok(PoolStats::capture(&*self.lock()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(|_| {
            tracing::error!("Pool lock poisoned");
            PoolError::LockPoisoned
        })
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot < self.config.capacity {
            Ok(())
        } else {
            Err(PoolError::SlotOutOfRange {
                slot,
                capacity: self.config.capacity,
            })
        }
    }
}
