//! Access to the transition records backing the pool.
//!
//! The pool only ever reads the kind of the record behind a slot index. The
//! records themselves (and their payloads) belong to the host, typically a
//! shared-memory segment written by the producer right after a reservation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::kind::Kind;

/// Read side of the record store.
pub trait TransitionStore {
    /// Kind of the record last written into `slot`.
    fn kind(&self, slot: usize) -> Kind;

    /// Number of records available.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: TransitionStore + ?Sized> TransitionStore for &S {
    fn kind(&self, slot: usize) -> Kind {
        (**self).kind(slot)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

impl<S: TransitionStore + ?Sized> TransitionStore for Arc<S> {
    fn kind(&self, slot: usize) -> Kind {
        (**self).kind(slot)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

/// In-process record store holding only kinds.
///
/// Cells are atomics so the producer can publish a kind while consumers read
/// other slots without going through the pool lock.
pub struct KindTable {
    kinds: Box<[AtomicU32]>,
}

impl KindTable {
    pub fn new(len: usize) -> Self {
        Self {
            kinds: (0..len)
                .map(|_| AtomicU32::new(Kind::UNKNOWN.raw()))
                .collect(),
        }
    }

    /// Publish the kind of the record just written into `slot`.
    ///
    /// Panics if `slot` is out of range, like slice indexing.
    pub fn write(&self, slot: usize, kind: Kind) {
        self.kinds[slot].store(kind.raw(), Ordering::Release);
    }
}

impl TransitionStore for KindTable {
    fn kind(&self, slot: usize) -> Kind {
        Kind::new(self.kinds[slot].load(Ordering::Acquire))
    }

    fn len(&self) -> usize {
        self.kinds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_starts_unknown() {
        let table = KindTable::new(3);
        assert_eq!(table.len(), 3);
        assert!((0..3).all(|slot| table.kind(slot) == Kind::UNKNOWN));
    }

    #[test]
    fn writes_are_visible_through_shared_handles() {
        let table = Arc::new(KindTable::new(2));
        let reader: Arc<KindTable> = Arc::clone(&table);
        table.write(1, Kind::CONFIGURE);
        assert_eq!(reader.kind(1), Kind::CONFIGURE);
        assert_eq!((&*reader).kind(0), Kind::UNKNOWN);
    }
}
