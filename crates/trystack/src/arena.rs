//! Reference-counted slot arena that owns every live exception of a context.
//!
//! An exception is referenced by the block that holds it and by every newer
//! exception that names it as cause. Each of those owners accounts for one count;
//! `dec_ref` frees the slot when the last owner lets go and then releases the
//! cause chain. Freed slots go on a free list and are reused by later throws,
//! so a long-running retry loop keeps a constant footprint.

use std::fmt;

use crate::exception::{Exception, ExceptionRef};

/// Handle to an exception stored in an [`ExceptionArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ExceptionId(usize);

impl ExceptionId {
    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ExceptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of arena occupancy, used to check for leaked exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ExceptionStats {
    /// Exceptions currently alive (held by a block or reachable as a cause).
    pub live_exceptions: usize,
    /// Freed slots waiting to be reused.
    pub free_slots: usize,
    /// Total slot capacity (live + free).
    pub total_slots: usize,
    /// Exceptions allocated over the arena's lifetime.
    pub total_allocations: usize,
}

#[derive(Debug)]
struct Slot {
    refcount: usize,
    exception: Exception,
}

#[derive(Debug, Default)]
pub(crate) struct ExceptionArena {
    entries: Vec<Option<Slot>>,
    /// Freed slot IDs available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<ExceptionId>,
    total_allocations: usize,
}

impl ExceptionArena {
    /// Stores `exception` with a reference count of one and returns its handle.
    pub fn allocate(&mut self, exception: Exception) -> ExceptionId {
        self.total_allocations += 1;
        let slot = Slot { refcount: 1, exception };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(slot);
            id
        } else {
            self.entries.push(Some(slot));
            ExceptionId(self.entries.len() - 1)
        }
    }

    /// Adds an owner to a live exception.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the exception has already been freed.
    pub fn inc_ref(&mut self, id: ExceptionId) {
        self.slot_mut(id, "inc_ref").refcount += 1;
    }

    /// Removes an owner; frees the exception, then its causes, once unowned.
    ///
    /// `finalize` sees each exception right before its slot is freed, while its
    /// cause is still alive.
    ///
    /// # Panics
    /// Panics if the ID is invalid or the exception has already been freed.
    pub fn dec_ref(&mut self, id: ExceptionId, mut finalize: impl FnMut(ExceptionRef<'_>)) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let slot = self.slot_mut(id, "dec_ref");
            if slot.refcount > 1 {
                slot.refcount -= 1;
                return;
            }
            finalize(ExceptionRef::new(self, id));
            let Some(slot) = self.entries[id.index()].take() else {
                unreachable!("slot checked live above");
            };
            self.free_list.push(id);
            next = slot.exception.cause;
        }
    }

    /// # Panics
    /// Panics if the ID is invalid or the exception has already been freed.
    #[must_use]
    pub fn get(&self, id: ExceptionId) -> &Exception {
        &self
            .entries
            .get(id.index())
            .expect("ExceptionArena::get: slot missing")
            .as_ref()
            .expect("ExceptionArena::get: exception already freed")
            .exception
    }

    /// # Panics
    /// Panics if the ID is invalid or the exception has already been freed.
    pub fn get_mut(&mut self, id: ExceptionId) -> &mut Exception {
        &mut self.slot_mut(id, "get_mut").exception
    }

    #[must_use]
    pub fn refcount(&self, id: ExceptionId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |slot| slot.refcount)
    }

    #[must_use]
    pub fn is_live(&self, id: ExceptionId) -> bool {
        self.entries.get(id.index()).is_some_and(Option::is_some)
    }

    #[must_use]
    pub fn stats(&self) -> ExceptionStats {
        let live_exceptions = self.entries.iter().filter(|slot| slot.is_some()).count();
        ExceptionStats {
            live_exceptions,
            free_slots: self.entries.len() - live_exceptions,
            total_slots: self.entries.len(),
            total_allocations: self.total_allocations,
        }
    }

    fn slot_mut(&mut self, id: ExceptionId, operation: &'static str) -> &mut Slot {
        match self.entries.get_mut(id.index()) {
            Some(Some(slot)) => slot,
            Some(None) => panic!("ExceptionArena::{operation}: exception already freed"),
            None => panic!("ExceptionArena::{operation}: slot missing"),
        }
    }
}
