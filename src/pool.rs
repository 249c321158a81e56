//! Ordered, resizable collection of slots.
//!
//! Slots are addressed by their position in the pool. Each slot also carries
//! a [`SlotId`] that is never reused, so a slot re-created at an index that
//! was previously shrunk away can be told apart from its predecessor.

use crate::aggregate::{AggregateView, SlotAggregate};
use crate::scheduler::CycleId;
use serde::Serialize;
use std::collections::TryReserveError;
use std::fmt;
use tracing::debug;

/// Process-unique identity of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SlotId(u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position plus identity; what a fetch ticket remembers about its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub index: usize,
    pub id: SlotId,
}

/// A single display unit and its aggregate state.
#[derive(Debug, Clone)]
pub struct Slot {
    id: SlotId,
    aggregate: SlotAggregate,
    /// Cycle whose request for this slot is still outstanding.
    pending: Option<CycleId>,
    /// Last cycle that folded a sample into this slot.
    touched_by: Option<CycleId>,
}

impl Slot {
    fn new(id: SlotId) -> Self {
        Self {
            id,
            aggregate: SlotAggregate::new(),
            pending: None,
            touched_by: None,
        }
    }

    #[allow(dead_code)] // Accessor for callers holding a slot reference
    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn aggregate(&self) -> &SlotAggregate {
        &self.aggregate
    }

    /// True while a request issued by the active cycle is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn touched_by(&self) -> Option<CycleId> {
        self.touched_by
    }

    pub(crate) fn mark_pending(&mut self, cycle: CycleId) {
        self.pending = Some(cycle);
    }

    /// Clears the pending flag if it belongs to `cycle`.
    pub(crate) fn clear_pending(&mut self, cycle: CycleId) {
        if self.pending == Some(cycle) {
            self.pending = None;
        }
    }

    /// Folds a sample on behalf of `cycle`.
    pub(crate) fn fold(&mut self, cycle: CycleId, sample: f64) -> AggregateView {
        self.touched_by = Some(cycle);
        self.aggregate.fold(sample)
    }
}

/// Mutable, ordered set of slots.
#[derive(Debug, Default)]
pub struct SlotPool {
    slots: Vec<Slot>,
    next_id: u64,
}

impl SlotPool {
    /// Creates a pool with `size` fresh slots.
    pub fn with_size(size: usize) -> Self {
        let mut pool = Self {
            slots: Vec::with_capacity(size),
            next_id: 0,
        };
        pool.push_fresh(size);
        pool
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[allow(dead_code)] // Paired with len()
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshot of the slot keys in order, as of this call.
    pub fn current_slots(&self) -> Vec<SlotKey> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| SlotKey { index, id: slot.id })
            .collect()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Looks up the slot a key refers to. Returns `None` if the slot at that
    /// index is gone or has been replaced by a newer one.
    #[allow(dead_code)] // Read-only twin of get_mut
    pub fn get(&self, key: SlotKey) -> Option<&Slot> {
        self.slots.get(key.index).filter(|slot| slot.id == key.id)
    }

    pub(crate) fn get_mut(&mut self, key: SlotKey) -> Option<&mut Slot> {
        self.slots.get_mut(key.index).filter(|slot| slot.id == key.id)
    }

    /// Grows by appending fresh slots or shrinks by dropping tail slots,
    /// pending or not. Afterwards `len() == new_size`.
    ///
    /// Growth reserves up front; if that fails the pool is left unchanged.
    pub fn resize(&mut self, new_size: usize) -> Result<(), TryReserveError> {
        let old_size = self.slots.len();

        if new_size < old_size {
            self.slots.truncate(new_size);
        } else {
            let additional = new_size - old_size;
            self.slots.try_reserve(additional)?;
            self.push_fresh(additional);
        }

        debug!("Resized slot pool from {} to {}", old_size, new_size);
        Ok(())
    }

    fn push_fresh(&mut self, count: usize) {
        for _ in 0..count {
            let id = SlotId(self.next_id);
            self.next_id += 1;
            self.slots.push(Slot::new(id));
        }
    }
}
