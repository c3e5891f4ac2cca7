// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named object classes with size, freelist reuse and extension slots.
//!
//! This is an "arena + index" stand-in for an intrusive freelist: each
//! class owns a `Vec<T>` slab and a `Vec<usize>` freelist of recycled
//! slot indices. There is no concurrent access to a class (the runtime is
//! single-threaded cooperative), so no atomics are needed here.

use std::collections::BTreeMap;

/// What happened to an object when an extension event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionEvent {
    Added,
    Removed,
    Changed,
}

/// An extension registered on a class: extra per-record state plus
/// optional lifecycle callbacks, fired in registration order.
pub struct Extension<T> {
    pub name: &'static str,
    pub on_event: Option<Box<dyn Fn(&mut T, ExtensionEvent)>>,
}

/// A named object class: a slab of `T` records with freelist reuse.
///
/// Extensions may only be registered while the class has zero live
/// records: growing a class's record layout after it has live records
/// would invalidate already-allocated slots.
pub struct ObjectClass<T> {
    name: &'static str,
    min_free: usize,
    slots: Vec<Option<T>>,
    freelist: Vec<usize>,
    live_count: usize,
    reused_count: usize,
    extensions: Vec<Extension<T>>,
    to_keystring: Option<Box<dyn Fn(&T) -> String>>,
}

impl<T: Default> ObjectClass<T> {
    /// Create a new, empty class. `min_free` bounds how many freed records
    /// are retained for reuse before being dropped outright: the freelist
    /// is kept only while its length is below `max(min_free, live/10)`.
    pub fn new(name: &'static str, min_free: usize) -> Self {
        Self {
            name,
            min_free,
            slots: Vec::new(),
            freelist: Vec::new(),
            live_count: 0,
            reused_count: 0,
            extensions: Vec::new(),
            to_keystring: None,
        }
    }

    /// Class name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of live (allocated, not yet freed) records.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Number of `malloc` calls satisfied from the freelist rather than by
    /// growing the slab.
    pub fn reused_count(&self) -> usize {
        self.reused_count
    }

    /// Register a diagnostic formatter for this class's records.
    pub fn set_to_keystring(&mut self, f: impl Fn(&T) -> String + 'static) {
        self.to_keystring = Some(Box::new(f));
    }

    /// Format a record for diagnostics, if a formatter was registered.
    pub fn to_keystring(&self, index: usize) -> Option<String> {
        let record = self.slots.get(index)?.as_ref()?;
        self.to_keystring.as_ref().map(|f| f(record))
    }

    /// Register an extension. Only permitted while the class has zero live
    /// records.
    pub fn add_extension(&mut self, ext: Extension<T>) -> Result<(), &'static str> {
        if self.live_count != 0 {
            return Err("cannot extend a class with live records");
        }
        self.extensions.push(ext);
        Ok(())
    }

    /// Fire the matching extension callbacks for `index`, in registration
    /// order.
    pub fn event(&mut self, index: usize, event: ExtensionEvent) {
        // Extension callbacks only observe `&mut T`; take the slot out
        // temporarily so extensions can't alias the slab's Vec storage.
        let Some(mut record) = self.slots.get_mut(index).and_then(Option::take) else {
            return;
        };
        for ext in &self.extensions {
            if let Some(cb) = &ext.on_event {
                cb(&mut record, event);
            }
        }
        self.slots[index] = Some(record);
    }

    /// Return a block from the freelist (zero-filled via `Default`) or grow
    /// the slab.
    pub fn malloc(&mut self) -> usize {
        self.live_count += 1;
        if let Some(index) = self.freelist.pop() {
            self.reused_count += 1;
            self.slots[index] = Some(T::default());
            index
        } else {
            self.slots.push(Some(T::default()));
            self.slots.len() - 1
        }
    }

    /// Release `index` back to the class: kept on the freelist if it is
    /// under the retention bound, otherwise dropped outright.
    pub fn free(&mut self, index: usize) {
        if self.slots.get(index).map(Option::is_some) != Some(true) {
            return;
        }
        self.live_count = self.live_count.saturating_sub(1);
        self.slots[index] = None;

        let bound = self.min_free.max(self.live_count / 10);
        if self.freelist.len() < bound {
            self.freelist.push(index);
        }
        // else: slot index is simply abandoned (never reused, never
        // revisited); its `None` already released the record's storage.
    }

    /// Borrow a live record.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Mutably borrow a live record.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }
}

/// Name-keyed registry of object classes.
#[derive(Default)]
pub struct ClassRegistry {
    names: BTreeMap<&'static str, ()>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a class name as registered. Classes themselves are typed
    /// (`ObjectClass<T>`) and owned by their subsystem; this registry only
    /// tracks the name-uniqueness invariant across subsystems.
    pub fn add(&mut self, name: &'static str) -> Result<(), &'static str> {
        if self.names.insert(name, ()).is_some() {
            return Err("duplicate object class name");
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) {
        self.names.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Record {
        value: u32,
    }

    #[test]
    fn malloc_then_free_then_reuse() {
        let mut class: ObjectClass<Record> = ObjectClass::new("test", 4);
        let a = class.malloc();
        assert_eq!(class.live_count(), 1);
        class.get_mut(a).unwrap().value = 42;

        class.free(a);
        assert_eq!(class.live_count(), 0);

        let b = class.malloc();
        assert_eq!(b, a, "freed slot should be reused");
        assert_eq!(class.get(b).unwrap().value, 0, "reused slot is zero-filled");
        assert_eq!(class.reused_count(), 1);
    }

    #[test]
    fn freelist_never_exceeds_live_records() {
        let mut class: ObjectClass<Record> = ObjectClass::new("test", 2);
        let handles: Vec<_> = (0..10).map(|_| class.malloc()).collect();
        for h in handles {
            class.free(h);
        }
        assert_eq!(class.live_count(), 0);
    }

    #[test]
    fn extension_rejected_once_class_has_live_records() {
        let mut class: ObjectClass<Record> = ObjectClass::new("test", 4);
        let _a = class.malloc();
        let ext = Extension {
            name: "late",
            on_event: None,
        };
        assert!(class.add_extension(ext).is_err());
    }

    #[test]
    fn extension_events_fire_in_registration_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut class: ObjectClass<Record> = ObjectClass::new("test", 4);
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let order1 = order.clone();
        class
            .add_extension(Extension {
                name: "first",
                on_event: Some(Box::new(move |_, _| order1.borrow_mut().push("first"))),
            })
            .unwrap();
        let order2 = order.clone();
        class
            .add_extension(Extension {
                name: "second",
                on_event: Some(Box::new(move |_, _| order2.borrow_mut().push("second"))),
            })
            .unwrap();

        let a = class.malloc();
        class.event(a, ExtensionEvent::Added);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut reg = ClassRegistry::new();
        reg.add("dup").unwrap();
        assert!(reg.add("dup").is_err());
        reg.remove("dup");
        reg.add("dup").unwrap();
    }
}
