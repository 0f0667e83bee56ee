// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Classify fault messages received on the monitor's fault endpoint.
// Author: Lukas Bower

//! Fault classification.
//!
//! Decoding is pure: a [`FaultMessage`] goes in and a [`FaultReport`] comes
//! out. Architecture specific details are supplied by a [`FaultDecoder`]
//! chosen at compile time ([`NativeDecoder`]). Unknown codes never fail, they
//! decode to "unexpected" descriptions.

pub mod aarch64;
mod cap;
pub mod riscv64;
pub mod vcpu;

use core::fmt;

use crate::abi::{fault_mr, fault_type, Badge, MessageInfo, Word};

pub use cap::{CapFault, LookupFailure};
pub use vcpu::VcpuFault;

/// Bytes below the stack base in which a VM fault is attributed to stack overflow.
pub const STACK_GUARD_BYTES: Word = 0x1000;
/// Fault message registers retained per receive.
pub const MAX_FAULT_MRS: usize = 16;

/// Fault type carried in the label of a fault message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultLabel {
    /// Not a fault: a component asking to become passive.
    Null,
    /// Capability lookup fault.
    Cap,
    /// Unknown system call.
    UnknownSyscall,
    /// Architecture exception.
    UserException,
    /// Debug exception.
    DebugException,
    /// Scheduling context timeout.
    Timeout,
    /// Virtual memory fault.
    VmFault,
    /// Virtual GIC maintenance interrupt.
    VgicMaintenance,
    /// Virtual CPU fault.
    VcpuFault,
    /// Virtual PPI event.
    VppiEvent,
    /// Label outside the kernel's fault set.
    Unknown(Word),
}

impl FaultLabel {
    /// Classify a raw message label.
    #[must_use]
    pub const fn from_raw(label: Word) -> Self {
        match label {
            fault_type::NULL_FAULT => Self::Null,
            fault_type::CAP_FAULT => Self::Cap,
            fault_type::UNKNOWN_SYSCALL => Self::UnknownSyscall,
            fault_type::USER_EXCEPTION => Self::UserException,
            fault_type::DEBUG_EXCEPTION => Self::DebugException,
            fault_type::TIMEOUT => Self::Timeout,
            fault_type::VM_FAULT => Self::VmFault,
            fault_type::VGIC_MAINTENANCE => Self::VgicMaintenance,
            fault_type::VCPU_FAULT => Self::VcpuFault,
            fault_type::VPPI_EVENT => Self::VppiEvent,
            other => Self::Unknown(other),
        }
    }

    /// Kernel name of the fault type.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Null => "NullFault",
            Self::Cap => "CapFault",
            Self::UnknownSyscall => "UnknownSyscall",
            Self::UserException => "UserException",
            Self::DebugException => "DebugException",
            Self::Timeout => "Timeout",
            Self::VmFault => "VMFault",
            Self::VgicMaintenance => "VGICMaintenance",
            Self::VcpuFault => "VCPUFault",
            Self::VppiEvent => "VPPIEvent",
            Self::Unknown(_) => "<unknown fault>",
        }
    }

    /// Label value as carried in the message tag.
    #[must_use]
    pub const fn raw(self) -> Word {
        match self {
            Self::Null => fault_type::NULL_FAULT,
            Self::Cap => fault_type::CAP_FAULT,
            Self::UnknownSyscall => fault_type::UNKNOWN_SYSCALL,
            Self::UserException => fault_type::USER_EXCEPTION,
            Self::DebugException => fault_type::DEBUG_EXCEPTION,
            Self::Timeout => fault_type::TIMEOUT,
            Self::VmFault => fault_type::VM_FAULT,
            Self::VgicMaintenance => fault_type::VGIC_MAINTENANCE,
            Self::VcpuFault => fault_type::VCPU_FAULT,
            Self::VppiEvent => fault_type::VPPI_EVENT,
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for FaultLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.label(), self.raw())
    }
}

/// One message received on the fault endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultMessage {
    /// Sender badge (component index).
    pub badge: Badge,
    /// Message tag; the label is the fault type.
    pub info: MessageInfo,
    mrs: [Word; MAX_FAULT_MRS],
}

impl FaultMessage {
    /// Build a message from a badge, a fault label and its message registers.
    ///
    /// Registers beyond [`MAX_FAULT_MRS`] are dropped.
    #[must_use]
    pub fn new(badge: Badge, label: Word, mrs: &[Word]) -> Self {
        let length = mrs.len().min(MAX_FAULT_MRS);
        let mut message = Self {
            badge,
            info: MessageInfo::new(label, 0, 0, length as Word),
            mrs: [0; MAX_FAULT_MRS],
        };
        message.mrs[..length].copy_from_slice(&mrs[..length]);
        message
    }

    /// Raw message label.
    #[must_use]
    pub fn label(&self) -> Word {
        self.info.label()
    }

    /// Message register `index`, zero when not transferred.
    #[must_use]
    pub fn mr(&self, index: usize) -> Word {
        self.mrs.get(index).copied().unwrap_or(0)
    }
}

/// Register values of a VM fault message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmFault {
    /// Faulting instruction.
    pub ip: Word,
    /// Faulting address.
    pub addr: Word,
    /// Instruction fetch rather than data access.
    pub instruction: bool,
    /// Architecture fault status register.
    pub fsr: Word,
}

impl VmFault {
    fn from_message(msg: &FaultMessage) -> Self {
        Self {
            ip: msg.mr(fault_mr::VM_FAULT_IP),
            addr: msg.mr(fault_mr::VM_FAULT_ADDR),
            instruction: msg.mr(fault_mr::VM_FAULT_PREFETCH_FAULT) != 0,
            fsr: msg.mr(fault_mr::VM_FAULT_FSR),
        }
    }
}

/// Architecture specific explanation of a VM fault.
///
/// `Display` may emit several lines.
pub trait VmFaultCause: fmt::Display + fmt::Debug + Clone + PartialEq {
    /// Headline of the fault report.
    fn title(&self) -> &'static str {
        "VMFault"
    }
}

/// Architecture hooks used by [`decode`].
pub trait FaultDecoder {
    /// Architecture name.
    const ARCH: &'static str;
    /// Register names in the order the kernel's `UserContext` stores them.
    const REGISTER_NAMES: &'static [&'static str];
    /// Decoded VM fault cause.
    type VmCause: VmFaultCause;

    /// Explain a VM fault.
    fn decode_vm(fault: &VmFault) -> Self::VmCause;

    /// Explain a vCPU fault. `None` when the kernel has no vCPU support.
    fn decode_vcpu(_hsr: Word) -> Option<VcpuFault> {
        None
    }
}

/// Fault decoder of the target architecture.
#[cfg(target_arch = "riscv64")]
pub type NativeDecoder = riscv64::Riscv64Decoder<{ cfg!(feature = "cheri") }>;
/// Fault decoder of the target architecture.
#[cfg(not(target_arch = "riscv64"))]
pub type NativeDecoder = aarch64::Aarch64Decoder<{ cfg!(feature = "hypervisor") }>;

/// Outcome of decoding a genuine fault.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultReport<C> {
    /// Capability fault.
    Cap(CapFault),
    /// Architecture exception.
    UserException {
        /// Faulting instruction.
        ip: Word,
        /// Stack pointer at the fault.
        sp: Word,
    },
    /// Virtual memory fault.
    Vm {
        /// Raw fault registers.
        fault: VmFault,
        /// Architecture explanation.
        cause: C,
        /// Address lies in the guard page below the stack.
        stack_overflow: bool,
    },
    /// Virtual CPU fault.
    Vcpu(VcpuFault),
    /// Any other label.
    Unknown(FaultLabel),
}

/// Whether `addr` falls within one guard page below `stack_base`.
#[must_use]
pub fn stack_overflow_suspected(addr: Word, stack_base: Word) -> bool {
    match stack_base.checked_sub(STACK_GUARD_BYTES) {
        Some(guard) => addr >= guard && addr < stack_base,
        None => false,
    }
}

/// Classify `msg` from a component whose stack tops out at `stack_base`.
#[must_use]
pub fn decode<D: FaultDecoder>(msg: &FaultMessage, stack_base: Word) -> FaultReport<D::VmCause> {
    let label = FaultLabel::from_raw(msg.label());
    match label {
        FaultLabel::Cap => FaultReport::Cap(CapFault::from_message(msg)),
        FaultLabel::UserException => FaultReport::UserException {
            ip: msg.mr(fault_mr::USER_EXCEPTION_FAULT_IP),
            sp: msg.mr(fault_mr::USER_EXCEPTION_SP),
        },
        FaultLabel::VmFault => {
            let fault = VmFault::from_message(msg);
            FaultReport::Vm {
                cause: D::decode_vm(&fault),
                stack_overflow: stack_overflow_suspected(fault.addr, stack_base),
                fault,
            }
        }
        FaultLabel::VcpuFault => match D::decode_vcpu(msg.mr(fault_mr::VCPU_FAULT_HSR)) {
            Some(fault) => FaultReport::Vcpu(fault),
            None => FaultReport::Unknown(label),
        },
        _ => FaultReport::Unknown(label),
    }
}

impl<C: VmFaultCause> FaultReport<C> {
    /// Emit the report at error level.
    pub fn log(&self) {
        match self {
            Self::Cap(fault) => log::error!("{fault}"),
            Self::UserException { ip, sp } => {
                log::error!("UserException: ip={ip:#018x}  sp={sp:#018x}");
            }
            Self::Vm {
                fault,
                cause,
                stack_overflow,
            } => {
                log::error!(
                    "{}: ip={:#018x}  fault_addr={:#018x}  fsr={:#018x}  {}",
                    cause.title(),
                    fault.ip,
                    fault.addr,
                    fault.fsr,
                    if fault.instruction {
                        "(instruction fault)"
                    } else {
                        "(data fault)"
                    }
                );
                log::error!("{cause}");
                if *stack_overflow {
                    log::error!(
                        "potential stack overflow, fault address within one page outside of stack region"
                    );
                }
            }
            Self::Vcpu(fault) => log::error!("{fault}"),
            Self::Unknown(label) => log::error!("Unknown fault: {label}"),
        }
    }
}
