//! Client identifiers and per-slot client bitmasks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Number of client ids a [`ClientMask`] can hold.
pub const MAX_CLIENTS: u32 = u64::BITS;

/// Small integer id of a consumer, assigned by the host's client manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ClientId(u8);

impl ClientId {
    pub fn new(id: u32) -> Result<Self, PoolError> {
        if id < MAX_CLIENTS {
            Ok(Self(id as u8))
        } else {
            Err(PoolError::ClientOutOfRange(id))
        }
    }

    pub fn index(self) -> u32 {
        u32::from(self.0)
    }

    fn bit(self) -> u64 {
        1u64 << self.0
    }
}

impl TryFrom<u32> for ClientId {
    type Error = PoolError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<ClientId> for u32 {
    fn from(id: ClientId) -> Self {
        id.index()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One bit per client id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMask(u64);

impl ClientMask {
    pub const EMPTY: ClientMask = ClientMask(0);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, client: ClientId) -> bool {
        self.0 & client.bit() != 0
    }

    pub fn insert(&mut self, client: ClientId) {
        self.0 |= client.bit();
    }

    pub fn remove(&mut self, client: ClientId) {
        self.0 &= !client.bit();
    }

    pub fn union(&mut self, other: ClientMask) {
        self.0 |= other.0;
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(self) -> impl Iterator<Item = ClientId> {
        (0..MAX_CLIENTS as u8)
            .map(ClientId)
            .filter(move |client| self.contains(*client))
    }
}

impl FromIterator<ClientId> for ClientMask {
    fn from_iter<I: IntoIterator<Item = ClientId>>(iter: I) -> Self {
        let mut mask = ClientMask::EMPTY;
        for client in iter {
            mask.insert(client);
        }
        mask
    }
}

impl fmt::Display for ClientMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
