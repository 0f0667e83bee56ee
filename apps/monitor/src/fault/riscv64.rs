// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode RISC-V scause values, including CHERI security violations.
// Author: Lukas Bower

//! RISC-V 64 VM fault decoding.

use core::fmt;

use crate::abi::Word;

use super::{FaultDecoder, VmFault, VmFaultCause};

const CHERI_VIOLATION_BIT: u32 = 11;

/// Decoded RISC-V fault cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Riscv64Cause {
    /// Standard `scause` exception.
    Exception {
        /// Raw cause.
        scause: Word,
    },
    /// CHERI capability check failure.
    CheriViolation {
        /// Violation kind (`fsr & 0xf`).
        kind: Word,
        /// Access type (`(fsr >> 4) & 0xf`).
        access: Word,
    },
}

impl Riscv64Cause {
    /// Classify `fsr`; `cheri` enables the security violation encoding.
    #[must_use]
    pub fn from_fsr(fsr: Word, cheri: bool) -> Self {
        if cheri && (fsr >> CHERI_VIOLATION_BIT) & 1 != 0 {
            Self::CheriViolation {
                kind: fsr & 0xf,
                access: (fsr >> 4) & 0xf,
            }
        } else {
            Self::Exception { scause: fsr }
        }
    }
}

impl VmFaultCause for Riscv64Cause {
    fn title(&self) -> &'static str {
        match self {
            Self::Exception { .. } => "VMFault",
            Self::CheriViolation { .. } => "CHERI Security Violation",
        }
    }
}

impl fmt::Display for Riscv64Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exception { scause } => {
                write!(f, "description of fault: {}", scause_name(scause))
            }
            Self::CheriViolation { kind, access } => write!(
                f,
                "description of fault: {}\nCHERI fault type: {}",
                cheri_kind_name(kind),
                cheri_access_name(access)
            ),
        }
    }
}

/// Describe a supervisor exception cause.
#[must_use]
pub const fn scause_name(scause: Word) -> &'static str {
    match scause {
        0 => "Instruction address misaligned",
        1 => "Instruction access fault",
        2 => "Illegal instruction",
        3 => "Breakpoint",
        4 => "Load address misaligned",
        5 => "Load access fault",
        6 => "Store/AMO address misaligned",
        7 => "Store/AMO access fault",
        8 => "Environment call from U-mode",
        9 => "Environment call from S-mode",
        12 => "Instruction page fault",
        13 => "Load page fault",
        15 => "Store/AMO page fault",
        18 => "Software check",
        19 => "Hardware error",
        _ => "<Unexpected FSR>",
    }
}

/// Describe a CHERI violation kind.
#[must_use]
pub const fn cheri_kind_name(kind: Word) -> &'static str {
    match kind {
        0 => "Tag violation",
        1 => "Seal violation",
        2 => "Permission violation",
        3 => "Invalid address violation",
        4 => "Bounds violation",
        _ => "Unexpected CHERI fault",
    }
}

/// Describe a CHERI fault access type.
#[must_use]
pub const fn cheri_access_name(access: Word) -> &'static str {
    match access {
        0 => "CHERI instruction fetch fault",
        1 => "CHERI data fault due to load, store or AMO",
        2 => "CHERI jump or branch fault",
        _ => "Unexpected CHERI fault type",
    }
}

/// RISC-V decoder; `CHERI` enables security violation decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Riscv64Decoder<const CHERI: bool>;

impl<const CHERI: bool> FaultDecoder for Riscv64Decoder<CHERI> {
    const ARCH: &'static str = "riscv64";
    const REGISTER_NAMES: &'static [&'static str] = &[
        "pc", "ra", "sp", "gp", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10",
        "s11", "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "t0", "t1", "t2", "t3", "t4", "t5",
        "t6", "tp",
    ];
    type VmCause = Riscv64Cause;

    fn decode_vm(fault: &VmFault) -> Riscv64Cause {
        Riscv64Cause::from_fsr(fault.fsr, CHERI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::fault_type;
    use crate::fault::{decode, FaultMessage, FaultReport};

    #[test]
    fn plain_page_fault() {
        let cause = Riscv64Cause::from_fsr(13, false);
        assert_eq!(cause, Riscv64Cause::Exception { scause: 13 });
        assert_eq!(cause.title(), "VMFault");
        assert_eq!(std::format!("{cause}"), "description of fault: Load page fault");
    }

    #[test]
    fn cheri_bit_is_ignored_without_cheri() {
        let fsr = (1 << 11) | (1 << 4) | 4;
        assert_eq!(
            Riscv64Cause::from_fsr(fsr, false),
            Riscv64Cause::Exception { scause: fsr }
        );
    }

    #[test]
    fn cheri_violation_kind_and_type() {
        let fsr = (1 << 11) | (1 << 4) | 4;
        let cause = Riscv64Cause::from_fsr(fsr, true);
        assert_eq!(cause, Riscv64Cause::CheriViolation { kind: 4, access: 1 });
        assert_eq!(cause.title(), "CHERI Security Violation");
        assert_eq!(
            std::format!("{cause}"),
            "description of fault: Bounds violation\n\
             CHERI fault type: CHERI data fault due to load, store or AMO"
        );
        assert_eq!(cheri_kind_name(9), "Unexpected CHERI fault");
        assert_eq!(cheri_access_name(3), "Unexpected CHERI fault type");
    }

    #[test]
    fn decoder_dispatches_through_generic_path() {
        let msg = FaultMessage::new(1, fault_type::VM_FAULT, &[0x100, 0x200, 1, 12]);
        match decode::<Riscv64Decoder<false>>(&msg, 0x1000) {
            FaultReport::Vm { fault, cause, .. } => {
                assert!(fault.instruction);
                assert_eq!(cause, Riscv64Cause::Exception { scause: 12 });
            }
            other => panic!("unexpected report {other:?}"),
        }
        assert_eq!(Riscv64Decoder::<true>::REGISTER_NAMES.len(), 32);
        assert_eq!(scause_name(10), "<Unexpected FSR>");
    }
}
