// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode vCPU faults raised by guests, recognising UBSAN trap encodings.
// Author: Lukas Bower

//! vCPU fault decoding.

use core::fmt;

use crate::abi::Word;

const EC_BRK_AARCH64: Word = 0x3c;
const ESR_COMMENT_MASK: Word = 0xffff;
const UBSAN_BRK_MASK: Word = 0x00ff;
const UBSAN_BRK_IMM: Word = 0x5500;

/// UBSAN checks in the order the compiler numbers them.
const UBSAN_CHECKS: [&str; 25] = [
    "add overflow",
    "builtin unreachable",
    "control-flow-integrity check fail",
    "division remainder overflow",
    "dynamic type cache miss",
    "float cast overflow",
    "function type mismatch",
    "implicit conversion",
    "invalid builtin",
    "invalid objc cast",
    "load invalid value",
    "missing return",
    "multiplication overflow",
    "negate overflow",
    "nullability argument",
    "nullability return",
    "non-null argument",
    "non-null return",
    "out of bounds access",
    "pointer overflow",
    "shift out of bounds",
    "subtraction overflow",
    "type mismatch",
    "alignment assumption",
    "variable-length-array bound not positive",
];

/// Describe a UBSAN check code.
#[must_use]
pub fn ubsan_check_name(code: Word) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|index| UBSAN_CHECKS.get(index))
        .copied()
        .unwrap_or("unknown reason")
}

/// A decoded vCPU fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcpuFault {
    /// Raw syndrome.
    pub esr: Word,
    /// UBSAN check code when the trap came from a UBSAN `brk`.
    pub ubsan: Option<Word>,
}

impl VcpuFault {
    /// Decode the syndrome reported for a vCPU fault.
    #[must_use]
    pub fn from_esr(esr: Word) -> Self {
        let comment = esr & ESR_COMMENT_MASK;
        let ubsan = ((esr >> 26) == EC_BRK_AARCH64 && (comment & !UBSAN_BRK_MASK) == UBSAN_BRK_IMM)
            .then_some(comment & UBSAN_BRK_MASK);
        Self { esr, ubsan }
    }
}

impl fmt::Display for VcpuFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "received vCPU fault with ESR: {:#018x}", self.esr)?;
        match self.ubsan {
            Some(code) => write!(
                f,
                "potential undefined behaviour detected by UBSAN for: '{}'",
                ubsan_check_name(code)
            ),
            None => f.write_str("Unknown vCPU fault"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brk(imm: Word) -> Word {
        (EC_BRK_AARCH64 << 26) | (1 << 25) | imm
    }

    #[test]
    fn ubsan_brk_is_recognised() {
        let fault = VcpuFault::from_esr(brk(0x5503));
        assert_eq!(fault.ubsan, Some(3));
        let text = std::format!("{fault}");
        assert!(
            text.ends_with("UBSAN for: 'division remainder overflow'"),
            "{text}"
        );
    }

    #[test]
    fn other_brk_immediates_are_unknown() {
        let fault = VcpuFault::from_esr(brk(0x5603));
        assert_eq!(fault.ubsan, None);
        assert!(std::format!("{fault}").ends_with("Unknown vCPU fault"));
        assert_eq!(VcpuFault::from_esr(0x5503).ubsan, None);
    }

    #[test]
    fn codes_past_the_table_are_unknown() {
        assert_eq!(ubsan_check_name(24), "variable-length-array bound not positive");
        assert_eq!(ubsan_check_name(25), "unknown reason");
        assert_eq!(VcpuFault::from_esr(brk(0x55ff)).ubsan, Some(0xff));
    }
}
