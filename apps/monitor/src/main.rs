// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Monitor binary: seL4 image on bare metal, simulation demo on the host.
// Author: Lukas Bower
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

// The seL4 entry point (`sel4_start`) and the panic handler live in the library.
#[cfg(target_os = "none")]
use monitor as _;
#[cfg(target_os = "none")]
use sel4_runtime as _;

#[cfg(all(not(target_os = "none"), feature = "std"))]
fn main() -> anyhow::Result<()> {
    monitor::host::main()
}

#[cfg(all(not(target_os = "none"), not(feature = "std")))]
fn main() {
    eprintln!("monitor: the host simulation needs the `std` feature");
}
