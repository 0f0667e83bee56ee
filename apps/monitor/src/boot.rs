// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Sequence untyped validation, both replay passes and thread naming.
// Author: Lukas Bower

//! Boot sequence of the monitor.

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::invocation::InvocationBuffer;
use crate::monitor::Kernel;
use crate::replay::{replay, Pass, ReplayStats};
use crate::untyped::{self, BootUntypeds, UntypedInfo};

/// What the boot sequence did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootSummary {
    /// Bootstrap pass counters.
    pub bootstrap: ReplayStats,
    /// System pass counters.
    pub system: ReplayStats,
    /// Threads given debug names.
    pub named_threads: usize,
}

/// Bring the system up.
///
/// `system` is evaluated only after the bootstrap pass, which is what maps the
/// system invocation data into the monitor's address space.
pub fn bootstrap<'s, K, F>(
    kernel: &mut K,
    config: &MonitorConfig,
    expected: &UntypedInfo<'_>,
    boot: &BootUntypeds<'_>,
    bootstrap_buffer: &InvocationBuffer<'_>,
    system: F,
) -> Result<BootSummary, MonitorError>
where
    K: Kernel + ?Sized,
    F: FnOnce() -> InvocationBuffer<'s>,
{
    log::info!("Monitor bootstrap");
    if let Err(mismatch) = untyped::check(expected, boot) {
        log::error!("{mismatch}");
        untyped::dump(expected, boot);
        return Err(mismatch.into());
    }
    log::info!("bootinfo untyped list matches expected list");

    let mut summary = BootSummary {
        bootstrap: replay(kernel, Pass::Bootstrap, bootstrap_buffer)?,
        ..BootSummary::default()
    };
    let system_buffer = system();
    if system_buffer.count() > 0 && system_buffer.words().is_empty() {
        return Err(MonitorError::SystemDataEmpty {
            records: system_buffer.count(),
        });
    }
    log::debug!(
        "system pass: {} records in {} words",
        system_buffer.count(),
        system_buffer.words().len()
    );
    summary.system = replay(kernel, Pass::System, &system_buffer)?;

    if config.name_threads {
        for (_, component) in config.registry.iter() {
            kernel.name_thread(component.tcb, &component.name);
            summary.named_threads += 1;
        }
        for vm in config.registry.vms() {
            kernel.name_thread(vm.tcb, &vm.name);
            summary.named_threads += 1;
        }
    }
    log::info!(
        "system ready: {} bootstrap and {} system calls",
        summary.bootstrap.calls,
        summary.system.calls
    );
    Ok(summary)
}
