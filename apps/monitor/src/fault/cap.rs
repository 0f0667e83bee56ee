// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode capability faults and their lookup failure details.
// Author: Lukas Bower

use core::fmt;

use crate::abi::{fault_mr, lookup_failure, Word};

use super::FaultMessage;

/// Why a capability lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    /// No lookup failure recorded.
    NoFailure,
    /// The CSpace root was invalid.
    InvalidRoot,
    /// The addressed slot is empty.
    MissingCapability {
        /// Unresolved address bits.
        bits_left: Word,
    },
    /// The resolution depth did not match.
    DepthMismatch {
        /// Unresolved address bits.
        bits_left: Word,
        /// Bits the kernel resolved at the mismatch.
        bits_found: Word,
    },
    /// A CNode guard did not match.
    GuardMismatch {
        /// Unresolved address bits.
        bits_left: Word,
        /// Guard value found in the CNode.
        guard_found: Word,
        /// Size of the guard in bits.
        guard_bits: Word,
    },
    /// Unrecognised lookup failure type.
    Unknown(Word),
}

impl LookupFailure {
    fn from_message(msg: &FaultMessage) -> Self {
        let bits_left = msg.mr(fault_mr::CAP_FAULT_BITS_LEFT);
        match msg.mr(fault_mr::CAP_FAULT_LOOKUP_FAILURE_TYPE) {
            lookup_failure::NO_FAILURE => Self::NoFailure,
            lookup_failure::INVALID_ROOT => Self::InvalidRoot,
            lookup_failure::MISSING_CAPABILITY => Self::MissingCapability { bits_left },
            lookup_failure::DEPTH_MISMATCH => Self::DepthMismatch {
                bits_left,
                bits_found: msg.mr(fault_mr::CAP_FAULT_DEPTH_MISMATCH_BITS_FOUND),
            },
            lookup_failure::GUARD_MISMATCH => Self::GuardMismatch {
                bits_left,
                guard_found: msg.mr(fault_mr::CAP_FAULT_GUARD_MISMATCH_GUARD_FOUND),
                guard_bits: msg.mr(fault_mr::CAP_FAULT_GUARD_MISMATCH_BITS_FOUND),
            },
            other => Self::Unknown(other),
        }
    }

    /// Kernel name of the failure type.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NoFailure => "seL4_NoFailure",
            Self::InvalidRoot => "seL4_InvalidRoot",
            Self::MissingCapability { .. } => "seL4_MissingCapability",
            Self::DepthMismatch { .. } => "seL4_DepthMismatch",
            Self::GuardMismatch { .. } => "seL4_GuardMismatch",
            Self::Unknown(_) => "<unknown lookup failure>",
        }
    }
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())?;
        match *self {
            Self::MissingCapability { bits_left } => write!(f, "  bits_left={bits_left}"),
            Self::DepthMismatch {
                bits_left,
                bits_found,
            } => write!(f, "  bits_left={bits_left}  depth_bits_found={bits_found}"),
            Self::GuardMismatch {
                bits_left,
                guard_found,
                guard_bits,
            } => write!(
                f,
                "  bits_left={bits_left}  guard_found={guard_found:#x}  guard_bits_found={guard_bits}"
            ),
            Self::Unknown(raw) => write!(f, " ({raw:#x})"),
            Self::NoFailure | Self::InvalidRoot => Ok(()),
        }
    }
}

/// A decoded capability fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapFault {
    /// Faulting instruction.
    pub ip: Word,
    /// Capability address that failed to resolve.
    pub addr: Word,
    /// Whether the fault happened while receiving.
    pub in_recv_phase: bool,
    /// Lookup failure details.
    pub lookup: LookupFailure,
}

impl CapFault {
    pub(super) fn from_message(msg: &FaultMessage) -> Self {
        Self {
            ip: msg.mr(fault_mr::CAP_FAULT_IP),
            addr: msg.mr(fault_mr::CAP_FAULT_ADDR),
            in_recv_phase: msg.mr(fault_mr::CAP_FAULT_IN_RECV_PHASE) != 0,
            lookup: LookupFailure::from_message(msg),
        }
    }
}

impl fmt::Display for CapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CapFault: ip={:#018x}  fault_addr={:#018x}  in_recv_phase={}  lookup_failure_type={}",
            self.ip, self.addr, self.in_recv_phase, self.lookup
        )
    }
}
