// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Kernel ABI vocabulary shared by the decoder, replay engine and fault monitor.
// Author: Lukas Bower

//! seL4 ABI values the monitor reasons about without touching the kernel.
//!
//! The bindings crate owns the syscall stubs; this module keeps the plain data
//! (message-info layout, error codes, fault message register indices) so the
//! host build and the tests can use them without `sel4-sys`.

use core::fmt;

/// Native machine word of every supported target.
pub type Word = u64;
/// Capability index within the monitor's CSpace.
pub type CPtr = Word;
/// Badge carried by messages on the fault endpoint.
pub type Badge = Word;

/// Maximum number of message registers an invocation may carry (`seL4_MsgMaxLength`).
pub const MSG_MAX_LENGTH: usize = 120;
/// Maximum number of extra capabilities an invocation may carry (`seL4_MsgMaxExtraCaps`).
pub const MSG_MAX_EXTRA_CAPS: usize = 3;
/// Message registers passed in machine registers by `seL4_CallWithMRs`.
pub const FAST_MESSAGE_REGISTERS: usize = 4;

/// The seL4 message-info word: label, unwrapped-cap mask, extra cap count and length.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageInfo(Word);

impl MessageInfo {
    /// Pack a message-info word from its fields.
    #[must_use]
    pub const fn new(label: Word, caps_unwrapped: Word, extra_caps: Word, length: Word) -> Self {
        let mut value: Word = 0;
        value |= (label & 0x000f_ffff_ffff_ffff) << 12;
        value |= (caps_unwrapped & 0x7) << 9;
        value |= (extra_caps & 0x3) << 7;
        value |= length & 0x7f;
        Self(value)
    }

    /// Wrap a raw message-info word.
    #[must_use]
    pub const fn from_word(word: Word) -> Self {
        Self(word)
    }

    /// Raw encoded word.
    #[must_use]
    pub const fn word(self) -> Word {
        self.0
    }

    /// Invocation label, or the fault type on the fault endpoint.
    #[must_use]
    pub const fn label(self) -> Word {
        self.0 >> 12
    }

    /// Bit mask of capabilities the kernel unwrapped into badges.
    #[must_use]
    pub const fn caps_unwrapped(self) -> Word {
        (self.0 >> 9) & 0x7
    }

    /// Number of extra capabilities transferred with the message.
    #[must_use]
    pub const fn extra_caps(self) -> Word {
        (self.0 >> 7) & 0x3
    }

    /// Number of message registers in use.
    #[must_use]
    pub const fn length(self) -> Word {
        self.0 & 0x7f
    }
}

impl fmt::Debug for MessageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageInfo")
            .field("label", &self.label())
            .field("caps_unwrapped", &self.caps_unwrapped())
            .field("extra_caps", &self.extra_caps())
            .field("length", &self.length())
            .finish()
    }
}

/// Success value of an invocation reply label.
pub const NO_ERROR: Word = 0;

/// Render an seL4 error code the way the kernel headers name it.
#[must_use]
pub const fn error_name(code: Word) -> &'static str {
    match code {
        0 => "seL4_NoError",
        1 => "seL4_InvalidArgument",
        2 => "seL4_InvalidCapability",
        3 => "seL4_IllegalOperation",
        4 => "seL4_RangeError",
        5 => "seL4_AlignmentError",
        6 => "seL4_FailedLookup",
        7 => "seL4_TruncatedMessage",
        8 => "seL4_DeleteFirst",
        9 => "seL4_RevokeFirst",
        10 => "seL4_NotEnoughMemory",
        _ => "<invalid seL4 error>",
    }
}

/// Fault type labels delivered on the fault endpoint by an MCS kernel.
pub mod fault_type {
    use super::Word;

    /// Not a fault; sent by a component that wants to become passive.
    pub const NULL_FAULT: Word = 0;
    /// Capability lookup failed.
    pub const CAP_FAULT: Word = 1;
    /// System call number not recognised.
    pub const UNKNOWN_SYSCALL: Word = 2;
    /// Architecture exception.
    pub const USER_EXCEPTION: Word = 3;
    /// Breakpoint or watchpoint.
    pub const DEBUG_EXCEPTION: Word = 4;
    /// Scheduling context budget expired.
    pub const TIMEOUT: Word = 5;
    /// Virtual memory fault.
    pub const VM_FAULT: Word = 6;
    /// Virtual GIC maintenance interrupt.
    pub const VGIC_MAINTENANCE: Word = 7;
    /// Virtual CPU fault.
    pub const VCPU_FAULT: Word = 8;
    /// Virtual PPI event.
    pub const VPPI_EVENT: Word = 9;
}

/// Message register layout of each fault message.
pub mod fault_mr {
    /// Cap fault: faulting instruction.
    pub const CAP_FAULT_IP: usize = 0;
    /// Cap fault: capability address.
    pub const CAP_FAULT_ADDR: usize = 1;
    /// Cap fault: raised while receiving.
    pub const CAP_FAULT_IN_RECV_PHASE: usize = 2;
    /// Cap fault: lookup failure type.
    pub const CAP_FAULT_LOOKUP_FAILURE_TYPE: usize = 3;
    /// Cap fault: bits left to resolve.
    pub const CAP_FAULT_BITS_LEFT: usize = 4;
    /// Depth mismatch: bits found.
    pub const CAP_FAULT_DEPTH_MISMATCH_BITS_FOUND: usize = 5;
    /// Guard mismatch: guard found.
    pub const CAP_FAULT_GUARD_MISMATCH_GUARD_FOUND: usize = 5;
    /// Guard mismatch: guard size in bits.
    pub const CAP_FAULT_GUARD_MISMATCH_BITS_FOUND: usize = 6;

    /// User exception: faulting instruction.
    pub const USER_EXCEPTION_FAULT_IP: usize = 0;
    /// User exception: stack pointer.
    pub const USER_EXCEPTION_SP: usize = 1;

    /// VM fault: faulting instruction.
    pub const VM_FAULT_IP: usize = 0;
    /// VM fault: faulting address.
    pub const VM_FAULT_ADDR: usize = 1;
    /// VM fault: non-zero for an instruction fetch.
    pub const VM_FAULT_PREFETCH_FAULT: usize = 2;
    /// VM fault: fault status register.
    pub const VM_FAULT_FSR: usize = 3;

    /// vCPU fault: hypervisor syndrome register.
    pub const VCPU_FAULT_HSR: usize = 0;
}

/// Lookup failure types reported in a capability fault.
pub mod lookup_failure {
    use super::Word;

    /// No failure.
    pub const NO_FAILURE: Word = 0;
    /// Root CNode invalid.
    pub const INVALID_ROOT: Word = 1;
    /// Slot held no capability.
    pub const MISSING_CAPABILITY: Word = 2;
    /// Depth did not match.
    pub const DEPTH_MISMATCH: Word = 3;
    /// Guard did not match.
    pub const GUARD_MISMATCH: Word = 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_info_fields_round_trip() {
        let info = MessageInfo::new(0x2a, 0, 3, 120);
        assert_eq!(info.label(), 0x2a);
        assert_eq!(info.caps_unwrapped(), 0);
        assert_eq!(info.extra_caps(), 3);
        assert_eq!(info.length(), 120);
        assert_eq!(MessageInfo::from_word(info.word()), info);
    }

    #[test]
    fn message_info_masks_overlong_fields() {
        let info = MessageInfo::new(1, 0xf, 0x7, 0xff);
        assert_eq!(info.caps_unwrapped(), 0x7);
        assert_eq!(info.extra_caps(), 0x3);
        assert_eq!(info.length(), 0x7f);
        assert_eq!(info.label(), 1);
    }

    #[test]
    fn error_names_cover_kernel_codes() {
        assert_eq!(error_name(NO_ERROR), "seL4_NoError");
        assert_eq!(error_name(10), "seL4_NotEnoughMemory");
        assert_eq!(error_name(11), "<invalid seL4 error>");
    }
}
