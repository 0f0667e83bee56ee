// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Collect the build-tool-patched image tables into the monitor configuration.
// Author: Lukas Bower

//! Monitor configuration.
//!
//! The build tool writes component tables into the monitor image. They are
//! read once, before replay, into a [`MonitorConfig`] that the rest of the
//! monitor borrows immutably.

use crate::abi::{CPtr, Word};
use crate::registry::{
    name_from_bytes, Component, ComponentRegistry, RegistryError, VirtualMachine, MAX_NAME_LEN,
};

/// Raw name field as laid out in the image.
pub type NameField = [u8; MAX_NAME_LEN];

/// Borrowed views of the per-component tables patched into the image.
///
/// Every table is indexed by badge. Entries with an empty name are unused.
#[derive(Debug, Clone, Copy)]
pub struct ImageTables<'a> {
    /// Protection domain names.
    pub pd_names: &'a [NameField],
    /// Protection domain TCB capabilities.
    pub pd_tcbs: &'a [CPtr],
    /// Protection domain stack tops.
    pub pd_stack_addrs: &'a [Word],
    /// Scheduling context capabilities.
    pub scheduling_contexts: &'a [CPtr],
    /// Notification capabilities used for passive mode.
    pub notification_caps: &'a [CPtr],
    /// Virtual machine names.
    pub vm_names: &'a [NameField],
    /// Virtual machine TCB capabilities.
    pub vm_tcbs: &'a [CPtr],
}

/// Everything the monitor needs after boot.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Endpoint every component faults to.
    pub fault_ep: CPtr,
    /// Reply object used for receives on the fault endpoint.
    pub reply: CPtr,
    /// Registered components.
    pub registry: ComponentRegistry,
    /// Name kernel threads after their components once the system is built.
    pub name_threads: bool,
}

impl MonitorConfig {
    /// Configuration with an empty registry.
    #[must_use]
    pub fn new(fault_ep: CPtr, reply: CPtr) -> Self {
        Self {
            fault_ep,
            reply,
            registry: ComponentRegistry::new(),
            name_threads: false,
        }
    }

    /// Enable or disable thread naming.
    #[must_use]
    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.name_threads = enabled;
        self
    }

    /// Load components and VMs from the image tables.
    ///
    /// Badge 0 belongs to no component and is skipped, as are unnamed entries.
    pub fn load(&mut self, tables: &ImageTables<'_>) -> Result<(), RegistryError> {
        for (index, raw_name) in tables.pd_names.iter().enumerate().skip(1) {
            let name = name_from_bytes(raw_name);
            if name.is_empty() {
                continue;
            }
            let field = |table: &[Word]| table.get(index).copied().unwrap_or(0);
            self.registry.register(
                index as Word,
                Component {
                    name,
                    tcb: field(tables.pd_tcbs),
                    stack_base: field(tables.pd_stack_addrs),
                    sched_context: field(tables.scheduling_contexts),
                    notification: field(tables.notification_caps),
                },
            )?;
        }
        for (raw_name, tcb) in tables.vm_names.iter().zip(tables.vm_tcbs) {
            let name = name_from_bytes(raw_name);
            if name.is_empty() {
                continue;
            }
            self.registry.register_vm(VirtualMachine { name, tcb: *tcb })?;
        }
        log::debug!(
            "loaded {} components and {} virtual machines",
            self.registry.iter().count(),
            self.registry.vms().len()
        );
        Ok(())
    }
}
