// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Badge-indexed table of protection domains and virtual machines.
// Author: Lukas Bower

//! Component registry.
//!
//! The fault endpoint badge of each protection domain is its index in this
//! table. Badge 0 is never handed out.

use heapless::{String as HeaplessString, Vec as HeaplessVec};

use crate::abi::{Badge, CPtr, Word};

/// Capacity of the protection-domain table (and the badge space).
pub const MAX_COMPONENTS: usize = 64;
/// Capacity of the virtual-machine table.
pub const MAX_VMS: usize = 64;
/// Longest stored component name in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Bounded component name.
pub type Name = HeaplessString<MAX_NAME_LEN>;

/// Registry population failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Badge 0 is reserved.
    #[error("badge 0 is reserved")]
    ReservedBadge,
    /// Badge does not fit the table.
    #[error("badge {0} exceeds the component table")]
    BadgeOutOfRange(Badge),
    /// VM table is full.
    #[error("virtual machine table is full")]
    VmTableFull,
}

/// Everything the monitor knows about one protection domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    /// Name, empty when the slot is unused.
    pub name: Name,
    /// Thread control block capability.
    pub tcb: CPtr,
    /// Top of the component's stack.
    pub stack_base: Word,
    /// Scheduling context capability.
    pub sched_context: CPtr,
    /// Notification capability used for passive mode.
    pub notification: CPtr,
}

impl Component {
    /// Whether the slot holds a registered component.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Virtual machine entry used for thread naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    /// VM name.
    pub name: Name,
    /// TCB of the VM's vCPU thread.
    pub tcb: CPtr,
}

/// Badge-indexed protection-domain table plus the VM list.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    components: [Component; MAX_COMPONENTS],
    vms: HeaplessVec<VirtualMachine, MAX_VMS>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            components: core::array::from_fn(|_| Component::default()),
            vms: HeaplessVec::new(),
        }
    }

    /// Store `component` under `badge`, replacing any previous entry.
    pub fn register(&mut self, badge: Badge, component: Component) -> Result<(), RegistryError> {
        if badge == 0 {
            return Err(RegistryError::ReservedBadge);
        }
        let slot = usize::try_from(badge)
            .ok()
            .and_then(|index| self.components.get_mut(index))
            .ok_or(RegistryError::BadgeOutOfRange(badge))?;
        *slot = component;
        Ok(())
    }

    /// Slot for `badge`, registered or not. `None` when the badge is out of range.
    #[must_use]
    pub fn slot(&self, badge: Badge) -> Option<&Component> {
        usize::try_from(badge)
            .ok()
            .and_then(|index| self.components.get(index))
    }

    /// Registered component for `badge`.
    #[must_use]
    pub fn get(&self, badge: Badge) -> Option<&Component> {
        self.slot(badge).filter(|component| component.is_registered())
    }

    /// Name of the component behind `badge`, if registered.
    #[must_use]
    pub fn name(&self, badge: Badge) -> Option<&str> {
        self.get(badge).map(|component| component.name.as_str())
    }

    /// Registered components with their badges.
    pub fn iter(&self) -> impl Iterator<Item = (Badge, &Component)> + '_ {
        self.components
            .iter()
            .enumerate()
            .filter(|(_, component)| component.is_registered())
            .map(|(index, component)| (index as Badge, component))
    }

    /// Append a virtual machine.
    pub fn register_vm(&mut self, vm: VirtualMachine) -> Result<(), RegistryError> {
        self.vms.push(vm).map_err(|_| RegistryError::VmTableFull)
    }

    /// Registered virtual machines.
    #[must_use]
    pub fn vms(&self) -> &[VirtualMachine] {
        &self.vms
    }
}

/// Convert a NUL-padded name field into a bounded string.
///
/// Stops at the first NUL, truncates to [`MAX_NAME_LEN`] bytes on a character
/// boundary and drops names that are not UTF-8.
#[must_use]
pub fn name_from_bytes(bytes: &[u8]) -> Name {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = match core::str::from_utf8(&bytes[..end]) {
        Ok(text) => text,
        Err(err) => match core::str::from_utf8(&bytes[..err.valid_up_to()]) {
            Ok(prefix) => prefix,
            Err(_) => "",
        },
    };
    let mut name = Name::new();
    for ch in text.chars() {
        if name.push(ch).is_err() {
            break;
        }
    }
    name
}
