//! Pool configuration.

use crate::error::{PoolError, Result};
use crate::kind::Kind;

/// Upper bound on slots; scans are linear and run under the pool lock.
pub const MAX_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of transition slots. Fixed for the life of the pool.
    pub capacity: usize,
    /// Only begin kind accepted while nothing is open.
    pub root: Kind,
    /// Recurring begin level; starting a new one marks lagging clients behind.
    pub cycle: Kind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            root: Kind::MAP,
            cycle: Kind::ENABLE,
        }
    }
}

impl PoolConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_root(mut self, root: Kind) -> Self {
        self.root = root;
        self
    }

    pub fn with_cycle(mut self, cycle: Kind) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(PoolError::InvalidConfig(format!(
                "capacity must be in 1..={MAX_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if !self.root.is_begin() {
            return Err(PoolError::InvalidConfig(format!(
                "root kind {} is not a begin kind",
                self.root
            )));
        }
        if !self.cycle.is_begin() || self.cycle < self.root {
            return Err(PoolError::InvalidConfig(format!(
                "cycle kind {} must be a begin kind at or inside root {}",
                self.cycle, self.root
            )));
        }
        Ok(())
    }

    /// Read `TRPOOL_CAPACITY`, `TRPOOL_ROOT_KIND` and `TRPOOL_CYCLE_KIND`,
    /// falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(capacity) = lookup("TRPOOL_CAPACITY") {
            config.capacity = capacity.trim().parse().map_err(|_| {
                PoolError::InvalidConfig(format!("TRPOOL_CAPACITY is not a number: {capacity}"))
            })?;
        }
        if let Some(root) = lookup("TRPOOL_ROOT_KIND") {
            config.root = root
                .parse()
                .map_err(|e| PoolError::InvalidConfig(format!("TRPOOL_ROOT_KIND: {e}")))?;
        }
        if let Some(cycle) = lookup("TRPOOL_CYCLE_KIND") {
            config.cycle = cycle
                .parse()
                .map_err(|e| PoolError::InvalidConfig(format!("TRPOOL_CYCLE_KIND: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }
}
