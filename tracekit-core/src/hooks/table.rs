//! Registries indexed by small integer id

use std::fmt;

use super::HookRegistry;

/// A sparse array of [`HookRegistry`], one slot per event type id
///
/// Slots are created on demand and the table only grows as far as the
/// largest id requested, so ids are expected to be small and dense.
pub struct HookTable<T: ?Sized> {
    slots: Vec<Option<HookRegistry<T>>>,
}

impl<T: ?Sized> HookTable<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Registry for `id`, created empty if missing
    pub fn find_or_create(&mut self, id: usize) -> &mut HookRegistry<T> {
        if id >= self.slots.len() {
            self.slots.resize_with(id + 1, || None);
        }
        self.slots[id].get_or_insert_with(HookRegistry::new)
    }

    /// Registry for `id` if one was created; never allocates
    pub fn get(&self, id: usize) -> Option<&HookRegistry<T>> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut HookRegistry<T>> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    /// Drop the registry for `id`
    pub fn remove(&mut self, id: usize) -> Option<HookRegistry<T>> {
        self.slots.get_mut(id).and_then(Option::take)
    }

    /// One past the largest id a slot exists for
    pub fn max_id(&self) -> usize {
        self.slots.len()
    }

    /// Populated slots with their ids
    pub fn iter(&self) -> impl Iterator<Item = (usize, &HookRegistry<T>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|r| (id, r)))
    }

    /// Merge every populated registry of `other` into the same id here
    pub fn add_table(&mut self, other: &HookTable<T>) {
        for (id, registry) in other.iter() {
            self.find_or_create(id).add_list(registry);
        }
    }

    /// Undo [`add_table`](Self::add_table); emptied slots are dropped
    pub fn remove_table(&mut self, other: &HookTable<T>) {
        for (id, registry) in other.iter() {
            if let Some(slot) = self.get_mut(id) {
                slot.remove_list(registry);
                if slot.is_empty() {
                    self.slots[id] = None;
                }
            }
        }
    }
}

impl<T: ?Sized> Default for HookTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for HookTable<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for HookTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Priority;

    #[test]
    fn test_find_or_create_grows_to_id() {
        let mut table: HookTable<u32> = HookTable::new();
        assert_eq!(table.max_id(), 0);

        table.find_or_create(3);
        assert_eq!(table.max_id(), 4);
        assert!(table.get(3).is_some());
        assert!(table.get(1).is_none());

        table.find_or_create(1);
        assert_eq!(table.max_id(), 4);
    }

    #[test]
    fn test_get_never_allocates() {
        let table: HookTable<u32> = HookTable::new();
        assert!(table.get(100).is_none());
        assert_eq!(table.max_id(), 0);
    }

    #[test]
    fn test_remove_slot() {
        let mut table: HookTable<u32> = HookTable::new();
        table.find_or_create(2).add_fn(Priority::DEFAULT, |_, _| true);
        let removed = table.remove(2).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(table.get(2).is_none());
        assert!(table.remove(9).is_none());
    }

    #[test]
    fn test_add_and_remove_table() {
        let mut base: HookTable<u32> = HookTable::new();
        base.find_or_create(0).add_fn(Priority(10), |_, _| false);

        let mut extra: HookTable<u32> = HookTable::new();
        extra.find_or_create(0).add_fn(Priority(5), |_, _| false);
        extra.find_or_create(4).add_fn(Priority(5), |_, _| true);

        base.add_table(&extra);
        assert_eq!(base.get(0).unwrap().len(), 2);
        assert!(base.get(4).unwrap().call(&0));
        assert_eq!(base.iter().count(), 2);

        base.remove_table(&extra);
        assert_eq!(base.get(0).unwrap().len(), 1);
        assert!(base.get(4).is_none());
    }
}
