// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Entry stub and boot stack for the seL4 initial thread.
// Author: Lukas Bower
#![cfg_attr(target_os = "none", no_std)]
#![allow(clippy::missing_safety_doc)]

//! The kernel starts the initial thread at `_start` with the boot info pointer
//! in the first argument register and no stack. The stub installs the boot
//! stack and jumps to the application's `sel4_start`, boot info unchanged.

#[cfg(target_os = "none")]
use sel4_sys::seL4_BootInfo;

/// Size of the initial thread's stack.
pub const STACK_BYTES: usize = 64 * 1024;

#[allow(dead_code)]
#[repr(C, align(16))]
struct BootStack([u8; STACK_BYTES]);

// Kept in `.data` so the stack stays inside the image's main load segment.
#[cfg(target_os = "none")]
#[link_section = ".data"]
#[used]
static mut BOOT_STACK: BootStack = BootStack([0; STACK_BYTES]);

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
core::arch::global_asm!(
    "
    .section .text._start,\"ax\"
    .globl _start
    .p2align 2
_start:
    adrp x1, {stack}
    add x1, x1, :lo12:{stack}
    add x1, x1, #{bytes}
    mov sp, x1
    b {entry}
    ",
    stack = sym BOOT_STACK,
    bytes = const STACK_BYTES,
    entry = sym __sel4_start_rust,
);

#[cfg(all(target_os = "none", target_arch = "riscv64"))]
core::arch::global_asm!(
    "
    .section .text._start,\"ax\"
    .globl _start
    .p2align 2
_start:
    lla sp, {stack}
    li t0, {bytes}
    add sp, sp, t0
    j {entry}
    ",
    stack = sym BOOT_STACK,
    bytes = const STACK_BYTES,
    entry = sym __sel4_start_rust,
);

#[cfg(target_os = "none")]
#[inline(never)]
unsafe extern "C" fn __sel4_start_rust(bootinfo: *mut seL4_BootInfo) -> ! {
    extern "C" {
        fn sel4_start(bootinfo: *const seL4_BootInfo) -> !;
    }
    sel4_start(bootinfo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_stack_keeps_the_abi_alignment() {
        assert_eq!(core::mem::align_of::<BootStack>(), 16);
        assert_eq!(core::mem::size_of::<BootStack>(), STACK_BYTES);
        assert_eq!(STACK_BYTES % 16, 0);
    }
}
