//! Sorted, reference-counted hook registry

use std::collections::HashMap;
use std::fmt;

use super::{Hook, HookData, Priority};

/// One registration in a [`HookRegistry`]
pub struct HookEntry<T: ?Sized> {
    hook: Hook<T>,
    data: HookData,
    priority: Priority,
    ref_count: u32,
}

impl<T: ?Sized> HookEntry<T> {
    pub fn hook(&self) -> &Hook<T> {
        &self.hook
    }

    pub fn data(&self) -> &HookData {
        &self.data
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn matches(&self, hook: &Hook<T>, data: &HookData) -> bool {
        self.hook.same(hook) && self.data.same(data)
    }

    fn same_key(&self, other: &HookEntry<T>) -> bool {
        self.matches(&other.hook, &other.data)
    }

    fn key(&self) -> (usize, usize) {
        let hook = std::sync::Arc::as_ptr(&self.hook.func) as *const () as usize;
        let data = self
            .data
            .0
            .as_ref()
            .map_or(0, |d| std::sync::Arc::as_ptr(d) as *const () as usize);
        (hook, data)
    }

    /// A new registration of the same pair, as inserted by `add_list`
    fn fresh(&self) -> Self {
        Self {
            hook: self.hook.clone(),
            data: self.data.clone(),
            priority: self.priority,
            ref_count: 1,
        }
    }

    #[inline]
    fn invoke(&self, payload: &T) -> bool {
        self.hook.invoke(&self.data, payload)
    }
}

impl<T: ?Sized> Clone for HookEntry<T> {
    fn clone(&self) -> Self {
        Self {
            hook: self.hook.clone(),
            data: self.data.clone(),
            priority: self.priority,
            ref_count: self.ref_count,
        }
    }
}

impl<T: ?Sized> fmt::Debug for HookEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEntry")
            .field("hook", &self.hook)
            .field("data", &self.data)
            .field("priority", &self.priority)
            .field("ref_count", &self.ref_count)
            .finish()
    }
}

/// Outcome of removing a hook
#[derive(Debug)]
pub enum Removal {
    /// Last reference dropped; the entry is gone and its data handed back
    Evicted(HookData),
    /// The entry is still registered by someone else
    StillReferenced { remaining: u32 },
}

impl Removal {
    pub fn is_evicted(&self) -> bool {
        matches!(self, Removal::Evicted(_))
    }
}

/// Hooks sorted by non-decreasing priority, ties kept in insertion order
///
/// A `(hook, data)` pair appears at most once; registering it again bumps a
/// reference count that removal has to bring back to zero before the entry
/// goes away. Registries must not be mutated while one of their hooks is
/// running.
pub struct HookRegistry<T: ?Sized> {
    entries: Vec<HookEntry<T>>,
}

impl<T: ?Sized> HookRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `hook` bound to `data`
    ///
    /// # Panics
    ///
    /// If the pair is already registered under a different priority.
    pub fn add(&mut self, hook: Hook<T>, data: HookData, priority: Priority) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.matches(&hook, &data)) {
            assert!(
                existing.priority == priority,
                "hook {:?} with {:?} re-added at priority {} but registered at priority {}",
                hook,
                data,
                priority,
                existing.priority
            );
            existing.ref_count += 1;
            return;
        }

        let at = self.entries.partition_point(|e| e.priority <= priority);
        self.entries.insert(
            at,
            HookEntry {
                hook,
                data,
                priority,
                ref_count: 1,
            },
        );
    }

    /// Register a closure with no bound data and return its handle
    pub fn add_fn<F>(&mut self, priority: Priority, func: F) -> Hook<T>
    where
        F: Fn(&HookData, &T) -> bool + Send + Sync + 'static,
    {
        let hook = Hook::new(func);
        self.add(hook.clone(), HookData::none(), priority);
        hook
    }

    /// Merge every entry of `other` into this registry
    ///
    /// Entries already present gain a reference; new ones are spliced in with
    /// a single lockstep pass over both sorted sequences, after existing
    /// entries of equal priority.
    ///
    /// # Panics
    ///
    /// If a shared pair carries different priorities in the two registries.
    pub fn add_list(&mut self, other: &HookRegistry<T>) {
        if other.entries.is_empty() {
            return;
        }

        let index: HashMap<(usize, usize), usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key(), i))
            .collect();

        let mut fresh = Vec::new();
        for entry in &other.entries {
            match index.get(&entry.key()) {
                Some(&i) => {
                    let existing = &mut self.entries[i];
                    assert!(
                        existing.priority == entry.priority,
                        "hook {:?} with {:?} merged at priority {} but registered at priority {}",
                        entry.hook,
                        entry.data,
                        entry.priority,
                        existing.priority
                    );
                    existing.ref_count += 1;
                }
                None => fresh.push(entry.fresh()),
            }
        }
        if fresh.is_empty() {
            return;
        }

        let current = std::mem::take(&mut self.entries);
        let mut merged = Vec::with_capacity(current.len() + fresh.len());
        let mut current = current.into_iter().peekable();
        for entry in fresh {
            while let Some(e) = current.next_if(|e| e.priority <= entry.priority) {
                merged.push(e);
            }
            merged.push(entry);
        }
        merged.extend(current);
        self.entries = merged;
    }

    /// Drop one reference to the first entry using `hook`, whatever its data
    ///
    /// # Panics
    ///
    /// If `hook` is not registered.
    pub fn remove(&mut self, hook: &Hook<T>) -> Removal {
        let Some(i) = self.entries.iter().position(|e| e.hook.same(hook)) else {
            panic!("removing hook {:?} that was never added", hook);
        };
        self.release_at(i)
    }

    /// Drop one reference to the `(hook, data)` entry
    ///
    /// # Panics
    ///
    /// If the pair is not registered.
    pub fn remove_with_data(&mut self, hook: &Hook<T>, data: &HookData) -> Removal {
        let Some(i) = self.entries.iter().position(|e| e.matches(hook, data)) else {
            panic!(
                "removing hook {:?} with {:?} that was never added",
                hook, data
            );
        };
        self.release_at(i)
    }

    /// Drop one reference to each entry of `other`
    ///
    /// When `other` was merged in with [`add_list`](Self::add_list) both
    /// sequences share their order and a single walk suffices; leftovers are
    /// looked up one by one.
    pub fn remove_list(&mut self, other: &HookRegistry<T>) {
        let (mut i, mut j) = (0, 0);
        while i < self.entries.len() && j < other.entries.len() {
            if self.entries[i].same_key(&other.entries[j]) {
                if let Removal::StillReferenced { .. } = self.release_at(i) {
                    i += 1;
                }
                j += 1;
            } else {
                i += 1;
            }
        }

        for entry in &other.entries[j..] {
            self.remove_with_data(&entry.hook, &entry.data);
        }
    }

    /// Remove the entry at `index` regardless of its reference count
    pub fn remove_by_position(&mut self, index: usize) -> Option<HookEntry<T>> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    fn release_at(&mut self, i: usize) -> Removal {
        let entry = &mut self.entries[i];
        debug_assert!(entry.ref_count > 0);
        if entry.ref_count == 1 {
            Removal::Evicted(self.entries.remove(i).data)
        } else {
            entry.ref_count -= 1;
            Removal::StillReferenced {
                remaining: entry.ref_count,
            }
        }
    }

    /// Number of distinct entries
    pub fn number(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HookEntry<T>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HookEntry<T>> {
        self.entries.iter()
    }

    /// Invoke every hook in order and OR the results; never short-circuits
    pub fn call(&self, payload: &T) -> bool {
        let mut sum = false;
        for entry in &self.entries {
            sum |= entry.invoke(payload);
        }
        sum
    }

    /// Invoke hooks in order until one returns true
    pub fn call_check(&self, payload: &T) -> bool {
        self.entries.iter().any(|e| e.invoke(payload))
    }

    /// Invoke the hooks of both registries in combined priority order
    ///
    /// Entries of `a` run before entries of `b` on equal priority. Either
    /// registry may be absent. Results are OR-ed; every hook runs.
    pub fn call_merge<U: ?Sized>(
        a: Option<&HookRegistry<T>>,
        payload_a: &T,
        b: Option<&HookRegistry<U>>,
        payload_b: &U,
    ) -> bool {
        let mut sum = false;
        walk_merged(a, b, |side| {
            sum |= match side {
                Side::A(e) => e.invoke(payload_a),
                Side::B(e) => e.invoke(payload_b),
            };
            false
        });
        sum
    }

    /// Same traversal as [`call_merge`](Self::call_merge), stopping at the
    /// first hook that returns true
    pub fn call_check_merge<U: ?Sized>(
        a: Option<&HookRegistry<T>>,
        payload_a: &T,
        b: Option<&HookRegistry<U>>,
        payload_b: &U,
    ) -> bool {
        walk_merged(a, b, |side| match side {
            Side::A(e) => e.invoke(payload_a),
            Side::B(e) => e.invoke(payload_b),
        })
    }
}

enum Side<'r, T: ?Sized, U: ?Sized> {
    A(&'r HookEntry<T>),
    B(&'r HookEntry<U>),
}

/// Visit two sorted registries in merged priority order; stops as soon as
/// `visit` returns true and reports whether it did
fn walk_merged<'r, T: ?Sized, U: ?Sized>(
    a: Option<&'r HookRegistry<T>>,
    b: Option<&'r HookRegistry<U>>,
    mut visit: impl FnMut(Side<'r, T, U>) -> bool,
) -> bool {
    let a: &[HookEntry<T>] = a.map(|r| r.entries.as_slice()).unwrap_or_default();
    let b: &[HookEntry<U>] = b.map(|r| r.entries.as_slice()).unwrap_or_default();

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].priority <= b[j].priority {
            if visit(Side::A(&a[i])) {
                return true;
            }
            i += 1;
        } else {
            if visit(Side::B(&b[j])) {
                return true;
            }
            j += 1;
        }
    }
    for e in &a[i..] {
        if visit(Side::A(e)) {
            return true;
        }
    }
    for e in &b[j..] {
        if visit(Side::B(e)) {
            return true;
        }
    }
    false
}

impl<T: ?Sized> Default for HookRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for HookRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for HookRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

impl<'r, T: ?Sized> IntoIterator for &'r HookRegistry<T> {
    type Item = &'r HookEntry<T>;
    type IntoIter = std::slice::Iter<'r, HookEntry<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
