//! Table of FCBs that currently own a host file.
//!
//! A binding is keyed by the FCB's address in guest memory together with its
//! packed name. Programs sometimes copy an open FCB elsewhere before the next
//! call, so a lookup that misses on address falls back to the name alone and
//! moves the binding to the new address.

use log::debug;

use crate::dirent::{decode_name, PackedName};
use crate::error::{CpmError, CpmResult};

/// Default number of simultaneous bindings.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
struct Binding<H> {
    address: u16,
    name: PackedName,
    handle: H,
}

/// Fixed-capacity registry of host file handles.
#[derive(Debug)]
pub struct HostFileRegistry<H> {
    slots: Vec<Option<Binding<H>>>,
    capacity: usize,
}

impl<H> HostFileRegistry<H> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind `handle` to the FCB at `address`.
    ///
    /// An existing binding at the same address is replaced; otherwise a freed
    /// slot is reused before the table grows.
    pub fn bind(&mut self, address: u16, name: PackedName, handle: H) -> CpmResult<()> {
        let binding = Binding {
            address,
            name,
            handle,
        };

        let same = self
            .slots
            .iter()
            .position(|s| matches!(s, Some(b) if b.address == address));
        let index = match same.or_else(|| self.slots.iter().position(Option::is_none)) {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(CpmError::BindingTableFull(self.capacity)),
        };
        self.slots[index] = Some(binding);
        Ok(())
    }

    /// Handle bound to this FCB, rebinding by name if the FCB has moved.
    pub fn lookup(&mut self, address: u16, name: &PackedName) -> Option<&mut H> {
        let index = self.resolve(address, name)?;
        self.handle_mut(index)
    }

    /// Slot index of the binding for this FCB; same rules as [`lookup`](Self::lookup).
    pub fn resolve(&mut self, address: u16, name: &PackedName) -> Option<usize> {
        let exact = self
            .slots
            .iter()
            .position(|s| matches!(s, Some(b) if b.address == address && &b.name == name));
        if exact.is_some() {
            return exact;
        }

        let index = self
            .slots
            .iter()
            .position(|s| matches!(s, Some(b) if &b.name == name))?;
        if let Some(binding) = self.slots[index].as_mut() {
            debug!("FCB for {} moved to {:#06X}", decode_name(name), address);
            binding.address = address;
        }
        Some(index)
    }

    /// Handle in slot `index`.
    pub fn handle_mut(&mut self, index: usize) -> Option<&mut H> {
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .map(|b| &mut b.handle)
    }

    /// Release the binding at `address` and give back its handle.
    pub fn unbind(&mut self, address: u16) -> Option<H> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(b) if b.address == address))?;
        slot.take().map(|b| b.handle)
    }

    /// Live bindings as (address, name) pairs, for diagnostics.
    pub fn bound(&self) -> impl Iterator<Item = (u16, String)> + '_ {
        self.slots
            .iter()
            .flatten()
            .map(|b| (b.address, decode_name(&b.name)))
    }

    /// Drop every binding, closing the handles.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl<H> Default for HostFileRegistry<H> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &PackedName = b"A       TXT";
    const B: &PackedName = b"B       TXT";

    #[test]
    fn test_bind_and_lookup() {
        let mut reg = HostFileRegistry::new(4);
        reg.bind(0x5C, *A, 1).unwrap();
        reg.bind(0x200, *B, 2).unwrap();

        assert_eq!(reg.lookup(0x5C, A), Some(&mut 1));
        assert_eq!(reg.lookup(0x200, B), Some(&mut 2));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_lookup_follows_moved_fcb() {
        let mut reg = HostFileRegistry::new(4);
        reg.bind(0x5C, *A, 1).unwrap();

        assert_eq!(reg.lookup(0x300, A), Some(&mut 1));
        // The binding now lives at the new address.
        assert_eq!(reg.unbind(0x5C), None);
        assert_eq!(reg.unbind(0x300), Some(1));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_lookup_misses_unknown_name() {
        let mut reg = HostFileRegistry::new(4);
        reg.bind(0x5C, *A, 1).unwrap();
        assert_eq!(reg.lookup(0x5C, B), None);
    }

    #[test]
    fn test_rebind_same_address() {
        let mut reg = HostFileRegistry::new(1);
        reg.bind(0x5C, *A, 1).unwrap();
        reg.bind(0x5C, *B, 2).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(0x5C, B), Some(&mut 2));
    }

    #[test]
    fn test_freed_slot_reused() {
        let mut reg = HostFileRegistry::new(2);
        reg.bind(0x100, *A, 1).unwrap();
        reg.bind(0x200, *B, 2).unwrap();
        reg.unbind(0x100);
        reg.bind(0x300, *A, 3).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_capacity_exhausted() {
        let mut reg = HostFileRegistry::new(2);
        reg.bind(0x100, *A, 1).unwrap();
        reg.bind(0x200, *B, 2).unwrap();
        let err = reg.bind(0x300, *A, 3).unwrap_err();
        assert!(matches!(err, CpmError::BindingTableFull(2)));
        assert!(err.is_fatal());
    }
}
