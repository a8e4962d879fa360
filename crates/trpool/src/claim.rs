//! RAII claim on a slot.
//!
//! A `Claim` keeps its client's bit set in the slot's allocated mask until it
//! is released, either explicitly via [`Claim::release`] (which reports
//! catch-up) or implicitly on drop.

use crate::client::ClientId;
use crate::error::Result;
use crate::kind::Kind;
use crate::pool::TransitionPool;
use crate::store::TransitionStore;

#[must_use = "dropping a Claim releases the slot immediately"]
pub struct Claim<'a, S: TransitionStore> {
    pool: &'a TransitionPool<S>,
    slot: usize,
    client: ClientId,
    released: bool,
}

impl<'a, S: TransitionStore> Claim<'a, S> {
    pub(crate) fn new(pool: &'a TransitionPool<S>, slot: usize, client: ClientId) -> Self {
        Self {
            pool,
            slot,
            client,
            released: false,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn kind(&self) -> Kind {
        self.pool.store().kind(self.slot)
    }

    /// Release the slot. Returns true when this was the last thing a behind
    /// client held.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.pool.release(self.slot, self.client)
    }
}

impl<S: TransitionStore> Drop for Claim<'_, S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::debug!(slot = self.slot, client = %self.client, "Claim dropped without explicit release");
        if let Err(e) = self.pool.release(self.slot, self.client) {
            tracing::error!(slot = self.slot, client = %self.client, error = %e, "Failed to release dropped claim");
        }
    }
}
