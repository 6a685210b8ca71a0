// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Unique-name registries.
//!
//! Each namespace (settings, nets, physes, and the virts of one net) keeps
//! one table mapping a human-readable name to the named object's handle.

use crate::arena::Handle;
use crate::Error;
use std::collections::BTreeMap;

pub(crate) struct NameTable<T> {
    what: &'static str,
    map: BTreeMap<String, Handle<T>>,
}

impl<T> NameTable<T> {
    /// A table for the namespace described by `what` (used in diagnostics).
    pub(crate) fn new(what: &'static str) -> NameTable<T> {
        NameTable {
            what,
            map: BTreeMap::new(),
        }
    }

    /// Bind `name` to `handle`.
    ///
    /// Re-binding the same handle to its current name is a no-op; binding a
    /// name owned by another handle is a [`Error::Duplicate`].
    pub(crate) fn claim(&mut self, name: &str, handle: Handle<T>) -> Result<(), Error> {
        match self.map.get(name) {
            Some(present) if *present == handle => Ok(()),
            Some(_) => Err(Error::Duplicate(self.what)),
            None => {
                self.map.insert(name.to_string(), handle);
                Ok(())
            }
        }
    }

    /// Drop the binding for `name`, if any.
    pub(crate) fn release(&mut self, name: &str) {
        self.map.remove(name);
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Handle<T>> {
        self.map.get(name).copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn names_are_unique_per_table() {
        let mut arena: Arena<u8> = Arena::default();
        let a = arena.try_insert(1).unwrap();
        let b = arena.try_insert(2).unwrap();
        let mut names = NameTable::new("net name");

        names.claim("left", a).unwrap();
        assert!(matches!(names.claim("left", b), Err(Error::Duplicate("net name"))));
        // claiming one's own name again is fine
        names.claim("left", a).unwrap();
        assert_eq!(names.lookup("left"), Some(a));
    }

    #[test]
    fn released_names_can_be_reclaimed() {
        let mut arena: Arena<u8> = Arena::default();
        let a = arena.try_insert(1).unwrap();
        let b = arena.try_insert(2).unwrap();
        let mut names = NameTable::new("phys name");

        names.claim("host", a).unwrap();
        names.release("host");
        names.claim("host", b).unwrap();
        assert_eq!(names.lookup("host"), Some(b));
    }
}
