// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode AArch64 exception syndrome values reported with VM faults.
// Author: Lukas Bower

//! AArch64 VM fault decoding.
//!
//! The kernel reports the ESR of the faulting exception as the FSR. Only the
//! common data abort fields are decoded; other ISS encodings are shown raw.

use core::fmt;

use crate::abi::Word;

use super::{FaultDecoder, VcpuFault, VmFault, VmFaultCause};

/// Exception class of a data abort from a lower exception level.
pub const EC_DATA_ABORT_LOWER_EL: Word = 0x24;

/// Data abort specific syndrome bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAbort {
    /// Data fault status code.
    pub dfsc: Word,
    /// External abort.
    pub external_abort: bool,
    /// Fault on a cache maintenance operation.
    pub cache_maintenance: bool,
    /// Stage 2 fault during a stage 1 table walk.
    pub s1ptw: bool,
    /// Write rather than read.
    pub write: bool,
}

/// Decoded exception syndrome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aarch64Cause {
    /// Exception class.
    pub ec: Word,
    /// Instruction length bit.
    pub il: bool,
    /// Instruction specific syndrome.
    pub iss: Word,
    /// Present for data aborts from a lower exception level.
    pub data_abort: Option<DataAbort>,
}

impl Aarch64Cause {
    /// Split an ESR value.
    #[must_use]
    pub fn from_esr(esr: Word) -> Self {
        let ec = esr >> 26;
        let iss = esr & 0x1ff_ffff;
        let data_abort = (ec == EC_DATA_ABORT_LOWER_EL).then(|| DataAbort {
            dfsc: iss & 0x3f,
            external_abort: (iss >> 9) & 1 != 0,
            cache_maintenance: (iss >> 8) & 1 != 0,
            s1ptw: (iss >> 7) & 1 != 0,
            write: (iss >> 6) & 1 != 0,
        });
        Self {
            ec,
            il: (esr >> 25) & 1 != 0,
            iss,
            data_abort,
        }
    }
}

impl VmFaultCause for Aarch64Cause {}

impl fmt::Display for Aarch64Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  ec: {:#010x}  {}   il: {}   iss: {:#010x}",
            self.ec,
            ec_name(self.ec),
            u8::from(self.il),
            self.iss
        )?;
        if let Some(abort) = &self.data_abort {
            write!(
                f,
                "\n  dfsc = {} ({:#010x})",
                dfsc_name(abort.dfsc),
                abort.dfsc
            )?;
            if abort.external_abort {
                f.write_str(" -- external abort")?;
            }
            if abort.cache_maintenance {
                f.write_str(" -- cache maint")?;
            }
            if abort.s1ptw {
                f.write_str(" -- stage 2 fault for stage 1 page table walk")?;
            }
            if abort.write {
                f.write_str(" -- write not read")?;
            }
        }
        Ok(())
    }
}

/// Describe an exception class.
#[must_use]
pub const fn ec_name(ec: Word) -> &'static str {
    match ec {
        0 => "Unknown reason",
        1 => "Trapped WFI or WFE instruction execution",
        3 => "Trapped MCR or MRC access with (coproc==0b1111) this is not reported using EC 0b000000",
        4 => "Trapped MCRR or MRRC access with (coproc==0b1111) this is not reported using EC 0b000000",
        5 => "Trapped MCR or MRC access with (coproc==0b1110)",
        6 => "Trapped LDC or STC access",
        7 => "Access to SVC, Advanced SIMD or floating-point functionality trapped",
        12 => "Trapped MRRC access with (coproc==0b1110)",
        13 => "Branch Target Exception",
        17 => "SVC instruction execution in AArch32 state",
        21 => "SVC instruction execution in AArch64 state",
        24 => "Trapped MSR, MRS or System instruction execution in AArch64 state, this is not reported using EC 0xb000000, 0b000001 or 0b000111",
        25 => "Access to SVE functionality trapped",
        28 => "Exception from a Pointer Authentication instruction authentication failure",
        32 => "Instruction Abort from a lower Exception level",
        33 => "Instruction Abort taken without a change in Exception level",
        34 => "PC alignment fault exception",
        36 => "Data Abort from a lower Exception level",
        37 => "Data Abort taken without a change in Exception level",
        38 => "SP alignment fault exception",
        40 => "Trapped floating-point exception taken from AArch32 state",
        44 => "Trapped floating-point exception taken from AArch64 state",
        47 => "SError interrupt",
        48 => "Breakpoint exception from a lower Exception level",
        49 => "Breakpoint exception taken without a change in Exception level",
        50 => "Software Step exception from a lower Exception level",
        51 => "Software Step exception taken without a change in Exception level",
        52 => "Watchpoint exception from a lower Exception level",
        53 => "Watchpoint exception taken without a change in Exception level",
        56 => "BKPT instruction execution in AArch32 state",
        60 => "BRK instruction execution in AArch64 state",
        _ => "<invalid EC>",
    }
}

/// Describe a data fault status code.
#[must_use]
pub const fn dfsc_name(dfsc: Word) -> &'static str {
    match dfsc {
        0x00 => "address size fault, level 0",
        0x01 => "address size fault, level 1",
        0x02 => "address size fault, level 2",
        0x03 => "address size fault, level 3",
        0x04 => "translation fault, level 0",
        0x05 => "translation fault, level 1",
        0x06 => "translation fault, level 2",
        0x07 => "translation fault, level 3",
        0x09 => "access flag fault, level 1",
        0x0a => "access flag fault, level 2",
        0x0b => "access flag fault, level 3",
        0x0d => "permission fault, level 1",
        0x0e => "permission fault, level 2",
        0x0f => "permission fault, level 3",
        0x10 => "synchronous external abort",
        0x11 => "synchronous tag check fault",
        0x14 => "synchronous external abort, level 0",
        0x15 => "synchronous external abort, level 1",
        0x16 => "synchronous external abort, level 2",
        0x17 => "synchronous external abort, level 3",
        0x18 => "synchronous parity or ECC error",
        0x1c => "synchronous parity or ECC error, level 0",
        0x1d => "synchronous parity or ECC error, level 1",
        0x1e => "synchronous parity or ECC error, level 2",
        0x1f => "synchronous parity or ECC error, level 3",
        0x21 => "alignment fault",
        0x30 => "tlb conflict abort",
        0x31 => "unsupported atomic hardware update fault",
        _ => "<unexpected DFSC>",
    }
}

/// AArch64 decoder; `HYPERVISOR` enables vCPU fault decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch64Decoder<const HYPERVISOR: bool>;

impl<const HYPERVISOR: bool> FaultDecoder for Aarch64Decoder<HYPERVISOR> {
    const ARCH: &'static str = "aarch64";
    const REGISTER_NAMES: &'static [&'static str] = &[
        "pc", "sp", "spsr", "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x16", "x17",
        "x18", "x29", "x30", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x19", "x20", "x21",
        "x22", "x23", "x24", "x25", "x26", "x27", "x28", "tpidr_el0", "tpidrro_el0",
    ];
    type VmCause = Aarch64Cause;

    fn decode_vm(fault: &VmFault) -> Aarch64Cause {
        Aarch64Cause::from_esr(fault.fsr)
    }

    fn decode_vcpu(hsr: Word) -> Option<VcpuFault> {
        HYPERVISOR.then(|| VcpuFault::from_esr(hsr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_abort_bits_are_split() {
        // EC 0x24, IL set, ISS with EA, WnR and a level 3 translation fault.
        let esr = (0x24 << 26) | (1 << 25) | (1 << 9) | (1 << 6) | 0x07;
        let cause = Aarch64Cause::from_esr(esr);
        assert_eq!(cause.ec, 0x24);
        assert!(cause.il);
        assert_eq!(
            cause.data_abort,
            Some(DataAbort {
                dfsc: 0x07,
                external_abort: true,
                cache_maintenance: false,
                s1ptw: false,
                write: true,
            })
        );
        let text = std::format!("{cause}");
        assert!(text.contains("Data Abort from a lower Exception level"), "{text}");
        assert!(
            text.contains("dfsc = translation fault, level 3 (0x00000007) -- external abort -- write not read"),
            "{text}"
        );
    }

    #[test]
    fn other_classes_skip_dfsc() {
        let cause = Aarch64Cause::from_esr(0x20 << 26);
        assert_eq!(cause.data_abort, None);
        assert!(!std::format!("{cause}").contains("dfsc"));
    }

    #[test]
    fn unknown_codes_have_fallbacks() {
        assert_eq!(ec_name(2), "<invalid EC>");
        assert_eq!(dfsc_name(0x08), "<unexpected DFSC>");
        assert_eq!(dfsc_name(0x31), "unsupported atomic hardware update fault");
    }

    #[test]
    fn register_names_follow_user_context() {
        let names = Aarch64Decoder::<false>::REGISTER_NAMES;
        assert_eq!(names.len(), 36);
        assert_eq!(names[0], "pc");
        assert_eq!(names[12], "x16");
        assert_eq!(names[35], "tpidrro_el0");
    }
}
