// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Compile-time feature manifest and guard rails for monitor builds.
// Author: Lukas Bower

//! Compile-time feature manifest and guard rails for monitor builds.

/// vCPU fault decoding is compiled in.
pub const HYPERVISOR: bool = cfg!(feature = "hypervisor");

/// CHERI security violation decoding is compiled in.
pub const CHERI: bool = cfg!(feature = "cheri");

/// Kernel was built with `CONFIG_DEBUG_BUILD`; threads get debug names.
pub const DEBUG_BUILD: bool = cfg!(sel4_config_debug_build);

/// Kernel was built with `CONFIG_PRINTING`; the debug console is available.
pub const PRINTING: bool = cfg!(sel4_config_printing);

#[cfg(all(feature = "cheri", target_arch = "aarch64"))]
compile_error!("feature `cheri` is only supported on riscv64 targets");

#[cfg(all(feature = "hypervisor", target_arch = "riscv64"))]
compile_error!("feature `hypervisor` is only supported on aarch64 targets");

#[cfg(all(feature = "std", feature = "kernel", target_os = "none"))]
compile_error!("feature `std` cannot be used for seL4 targets; build with --no-default-features");

/// One-line summary of the compiled-in decoders, logged at boot.
#[must_use]
pub fn summary() -> &'static str {
    match (HYPERVISOR, CHERI) {
        (true, true) => "decoders: vcpu cheri",
        (true, false) => "decoders: vcpu",
        (false, true) => "decoders: cheri",
        (false, false) => "decoders: base",
    }
}
