// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Panic handler that reports the failure and suspends the initial thread.
// Author: Lukas Bower
#![allow(unsafe_code)]

use core::panic::PanicInfo;

use log::Level;
use sel4_sys as sys;

use crate::console;
use crate::kernel::debug_put_char;

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    // Bypass the logger: it may not be installed yet, and the level filter
    // must not hide the failure.
    let line = console::render::<{ console::RECORD_CAPACITY }>(
        Level::Error,
        format_args!("FAIL: {info}"),
    );
    for byte in line.bytes() {
        debug_put_char(byte);
    }
    // SAFETY: suspending ourselves leaves the thread visible to the kernel debugger.
    unsafe {
        sys::seL4_TCB_Suspend(sys::seL4_CapInitThreadTCB);
    }
    loop {
        core::hint::spin_loop();
    }
}
