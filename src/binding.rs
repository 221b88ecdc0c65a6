//! Slot -> buffer binding table
//!
//! Mirrors the device-level convention that a slot holds whichever buffer was
//! bound to it last. A buffer only ever removes or replaces its own entry, so
//! dropping a displaced buffer leaves the newer occupant in place.

use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Identity of a [`crate::Buffer`] within one context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BufferId(pub(crate) u64);

#[derive(Debug, Clone)]
struct Bound<R> {
    owner: BufferId,
    resource: R,
}

/// Generic over the bound resource so the bookkeeping can be exercised
/// without a device
#[derive(Debug)]
pub(crate) struct BindingTable<R = Arc<wgpu::Buffer>> {
    slots: FxHashMap<u32, Bound<R>>,
}

impl<R> Default for BindingTable<R> {
    fn default() -> Self {
        Self {
            slots: FxHashMap::default(),
        }
    }
}

impl<R: Clone> BindingTable<R> {
    /// Occupy `slot`, displacing any previous occupant
    pub(crate) fn bind(&mut self, slot: u32, owner: BufferId, resource: R) {
        if let Some(previous) = self.slots.insert(slot, Bound { owner, resource }) {
            if previous.owner != owner {
                log::debug!(
                    "[BindingTable] Slot {} taken over by buffer {} from buffer {}",
                    slot,
                    owner.0,
                    previous.owner.0
                );
            }
        }
    }

    /// Vacate `slot` if `owner` still occupies it
    pub(crate) fn unbind(&mut self, slot: u32, owner: BufferId) -> bool {
        match self.slots.get(&slot) {
            Some(bound) if bound.owner == owner => {
                self.slots.remove(&slot);
                true
            }
            _ => false,
        }
    }

    /// Swap the resource behind `slot` after a reallocation, if `owner`
    /// still occupies it
    pub(crate) fn replace(&mut self, slot: u32, owner: BufferId, resource: R) -> bool {
        match self.slots.get_mut(&slot) {
            Some(bound) if bound.owner == owner => {
                bound.resource = resource;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn lookup(&self, slot: u32) -> Option<R> {
        self.slots.get(&slot).map(|bound| bound.resource.clone())
    }

    pub(crate) fn owner(&self, slot: u32) -> Option<BufferId> {
        self.slots.get(&slot).map(|bound| bound.owner)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_bound_wins() {
        let mut table = BindingTable::default();
        table.bind(1, BufferId(1), "a");
        table.bind(1, BufferId(2), "b");

        assert_eq!(table.lookup(1), Some("b"));
        assert_eq!(table.owner(1), Some(BufferId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_displaced_buffer_cannot_unbind_new_occupant() {
        let mut table = BindingTable::default();
        table.bind(3, BufferId(1), "a");
        table.bind(3, BufferId(2), "b");

        assert!(!table.unbind(3, BufferId(1)));
        assert_eq!(table.lookup(3), Some("b"));

        assert!(table.unbind(3, BufferId(2)));
        assert_eq!(table.lookup(3), None);
    }

    #[test]
    fn test_replace_only_touches_own_slot() {
        let mut table = BindingTable::default();
        table.bind(0, BufferId(7), "old");

        assert!(!table.replace(0, BufferId(8), "intruder"));
        assert!(table.replace(0, BufferId(7), "new"));
        assert_eq!(table.lookup(0), Some("new"));

        assert!(!table.replace(5, BufferId(7), "nowhere"));
        assert_eq!(table.lookup(5), None);
    }

    #[test]
    fn test_rebind_moves_between_slots() {
        let mut table = BindingTable::default();
        table.bind(0, BufferId(1), 10u32);

        // what Buffer::rebind does
        table.unbind(0, BufferId(1));
        table.bind(4, BufferId(1), 10u32);

        assert_eq!(table.lookup(0), None);
        assert_eq!(table.lookup(4), Some(10));
    }
}
