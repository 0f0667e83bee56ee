// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Library surface of the seL4 initial-task monitor.
// Author: Lukas Bower
#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

//! The monitor is the first user-level task of a statically described seL4
//! system. It checks the kernel's untyped list against the build-time plan,
//! replays the packed capability invocations that build every component, and
//! then serves the shared fault endpoint for the life of the system.
//!
//! Everything except the `kernel` module is plain logic over the [`monitor::Kernel`]
//! trait and runs on the host under `cargo test`.

#[cfg(all(target_os = "none", not(feature = "kernel")))]
compile_error!("enable the `kernel` feature when building the monitor for seL4 targets");

/// seL4 ABI constants and the message-info word.
pub mod abi;
/// Boot sequence: untyped check, replay passes, thread naming.
pub mod boot;
pub mod config;
pub mod console;
pub mod error;
/// Fault decoding and per-architecture reports.
pub mod fault;
pub mod features;
pub mod invocation;
pub mod monitor;
/// Component and virtual machine lookup by badge.
pub mod registry;
/// Invocation replay engine.
pub mod replay;
pub mod untyped;

#[cfg(feature = "std")]
/// Host-mode simulation used for developer testing.
pub mod host;

#[cfg(all(feature = "kernel", target_os = "none"))]
/// Kernel entrypoint and seL4-backed [`monitor::Kernel`].
pub mod kernel;

#[cfg(all(feature = "kernel", target_os = "none"))]
mod panic;

pub use error::{fatal, MonitorError};
pub use monitor::{FaultMonitor, Kernel, Outcome};
