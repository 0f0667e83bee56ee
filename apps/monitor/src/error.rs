// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Monitor error type and the halting sink.
// Author: Lukas Bower

//! Errors that stop the monitor.

use crate::abi::{error_name, Badge, CPtr, Word};
use crate::invocation::DecodeError;
use crate::registry::RegistryError;
use crate::replay::Pass;
use crate::untyped::UntypedMismatch;

/// Every condition the monitor treats as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// The kernel untyped list differs from the build-time plan.
    #[error("untyped validation failed: {0}")]
    UntypedMismatch(#[from] UntypedMismatch),
    /// A record could not be decoded.
    #[error("{pass} invocation {record} is malformed: {reason}")]
    MalformedInvocation {
        /// Replay pass.
        pass: Pass,
        /// Record index within the pass.
        record: usize,
        /// Decoder diagnosis.
        reason: DecodeError,
    },
    /// The kernel rejected an invocation.
    #[error("{pass} invocation {record} iteration {iteration} failed with {}", error_name(*.status))]
    InvocationFailed {
        /// Replay pass.
        pass: Pass,
        /// Record index within the pass.
        record: usize,
        /// Iteration of the record.
        iteration: u64,
        /// seL4 error code.
        status: Word,
    },
    /// A genuine fault arrived with a badge no component owns.
    #[error("unknown badge {badge:#x} for fault label {label}")]
    UnknownBadge {
        /// Received badge.
        badge: Badge,
        /// Received fault label.
        label: Word,
    },
    /// Reading a faulting thread's registers failed.
    #[error("could not read registers of tcb {tcb:#x} (badge {badge:#x}): {}", error_name(*.status))]
    ReadRegisters {
        /// Faulting component badge.
        badge: Badge,
        /// TCB capability.
        tcb: CPtr,
        /// seL4 error code.
        status: Word,
    },
    /// System records are declared but no words of system data are mapped.
    #[error("{records} system invocations declared but the system data is empty (system_invocation_words is 0)")]
    SystemDataEmpty {
        /// Declared system record count.
        records: usize,
    },
    /// The image configuration could not be loaded into the registry.
    #[error("invalid image configuration: {0}")]
    Registry(#[from] RegistryError),
}

/// Log `err` and halt.
///
/// Kernel builds route the panic to a handler that suspends the initial thread.
pub fn fatal(err: &MonitorError) -> ! {
    log::error!("{err}");
    panic!("{err}");
}
