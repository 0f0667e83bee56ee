// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: seL4 entry point, build-tool-patched image statics and the kernel-backed Kernel impl.
// Author: Lukas Bower
#![allow(unsafe_code)]
#![allow(non_upper_case_globals)]

//! Kernel entry.
//!
//! This is the only module that touches the statics the build tool patches
//! into the image. They are read once into a [`MonitorConfig`] and the
//! untyped/invocation views handed to [`boot::bootstrap`]; the fault loop then
//! runs on [`Sel4Kernel`] forever.

use core::ptr::{self, addr_of};
use core::slice;

use log::LevelFilter;
use sel4_sys as sys;
use spin::Once;

use crate::abi::{CPtr, Word, FAST_MESSAGE_REGISTERS};
use crate::boot;
use crate::config::{ImageTables, MonitorConfig, NameField};
use crate::console::MonitorLogger;
use crate::error::{fatal, MonitorError};
use crate::fault::{FaultMessage, NativeDecoder, MAX_FAULT_MRS};
use crate::features;
use crate::invocation::{EffectiveCall, InvocationBuffer};
use crate::monitor::{FaultMonitor, Kernel};
use crate::registry::{MAX_COMPONENTS, MAX_VMS};
use crate::replay::{InvocationReply, Invoke, BOOTSTRAP_INVOCATION_DATA_SIZE};
use crate::untyped::{BootUntypeds, UntypedInfo, UntypedRegion, MAX_UNTYPED_REGIONS};

/// Virtual address the bootstrap pass maps the system invocation data at.
pub const SYSTEM_INVOCATION_VADDR: usize = 0x8000_0000;

/// Untyped table layout written by the build tool.
#[repr(C)]
pub struct PatchedUntypedInfo {
    cap_start: Word,
    cap_end: Word,
    regions: [UntypedRegion; MAX_UNTYPED_REGIONS],
}

const EMPTY_NAME: NameField = [0; crate::registry::MAX_NAME_LEN];

// Everything below is overwritten in the ELF by the build tool. The statics
// live in `.data` so they have file backing to patch.

#[no_mangle]
#[link_section = ".data"]
static mut bootstrap_invocation_count: Word = 0;
#[no_mangle]
#[link_section = ".data"]
static mut bootstrap_invocation_data: [Word; BOOTSTRAP_INVOCATION_DATA_SIZE] =
    [0; BOOTSTRAP_INVOCATION_DATA_SIZE];
#[no_mangle]
#[link_section = ".data"]
static mut system_invocation_count: Word = 0;
/// Number of words of system invocation data mapped at
/// [`SYSTEM_INVOCATION_VADDR`]. This bound is not part of the stock build
/// tool's patch set; an image that leaves it at 0 while declaring system
/// invocations is rejected before the system pass with
/// [`MonitorError::SystemDataEmpty`].
#[no_mangle]
#[link_section = ".data"]
static mut system_invocation_words: Word = 0;
#[no_mangle]
#[link_section = ".data"]
static mut untyped_info: PatchedUntypedInfo = PatchedUntypedInfo {
    cap_start: 0,
    cap_end: 0,
    regions: [UntypedRegion::new(0, 0, false); MAX_UNTYPED_REGIONS],
};
#[no_mangle]
#[link_section = ".data"]
static mut pd_names: [NameField; MAX_COMPONENTS] = [EMPTY_NAME; MAX_COMPONENTS];
#[no_mangle]
#[link_section = ".data"]
static mut pd_names_len: Word = 0;
#[no_mangle]
#[link_section = ".data"]
static mut pd_tcbs: [CPtr; MAX_COMPONENTS] = [0; MAX_COMPONENTS];
#[no_mangle]
#[link_section = ".data"]
static mut pd_stack_addrs: [Word; MAX_COMPONENTS] = [0; MAX_COMPONENTS];
#[no_mangle]
#[link_section = ".data"]
static mut scheduling_contexts: [CPtr; MAX_COMPONENTS] = [0; MAX_COMPONENTS];
#[no_mangle]
#[link_section = ".data"]
static mut notification_caps: [CPtr; MAX_COMPONENTS] = [0; MAX_COMPONENTS];
#[no_mangle]
#[link_section = ".data"]
static mut vm_names: [NameField; MAX_VMS] = [EMPTY_NAME; MAX_VMS];
#[no_mangle]
#[link_section = ".data"]
static mut vm_names_len: Word = 0;
#[no_mangle]
#[link_section = ".data"]
static mut vm_tcbs: [CPtr; MAX_VMS] = [0; MAX_VMS];
#[no_mangle]
#[link_section = ".data"]
static mut fault_ep: CPtr = 0;
#[no_mangle]
#[link_section = ".data"]
static mut reply: CPtr = 0;

static LOGGER: MonitorLogger = MonitorLogger::new(debug_put_char, LevelFilter::Info);
static CONFIG: Once<MonitorConfig> = Once::new();

/// # Safety
///
/// `word` must point at one of the patched statics.
unsafe fn patched_word(word: *const Word) -> Word {
    // SAFETY: guaranteed by the caller.
    unsafe { ptr::read_volatile(word) }
}

/// Write one byte to the kernel debug console.
pub fn debug_put_char(byte: u8) {
    if features::PRINTING {
        // SAFETY: the debug syscall takes no memory arguments.
        unsafe { sys::seL4_DebugPutChar(byte) }
    }
}

fn install_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LOGGER.level());
    }
}

/// Number of named entries plus the unused index 0, capped at `max`.
fn table_len(len: Word, max: usize) -> usize {
    (len as usize).saturating_add(1).min(max)
}

fn load_config() -> MonitorConfig {
    // SAFETY: the patched statics are only read, and only from this thread.
    let tables = unsafe {
        let pd_len = table_len(patched_word(addr_of!(pd_names_len)), MAX_COMPONENTS);
        let vm_len = table_len(patched_word(addr_of!(vm_names_len)), MAX_VMS);
        ImageTables {
            pd_names: &(*addr_of!(pd_names))[..pd_len],
            pd_tcbs: &(*addr_of!(pd_tcbs))[..pd_len],
            pd_stack_addrs: &(*addr_of!(pd_stack_addrs))[..pd_len],
            scheduling_contexts: &(*addr_of!(scheduling_contexts))[..pd_len],
            notification_caps: &(*addr_of!(notification_caps))[..pd_len],
            vm_names: &(*addr_of!(vm_names))[..vm_len],
            vm_tcbs: &(*addr_of!(vm_tcbs))[..vm_len],
        }
    };
    // SAFETY: as above.
    let (endpoint, reply_object) =
        unsafe { (patched_word(addr_of!(fault_ep)), patched_word(addr_of!(reply))) };
    let mut config =
        MonitorConfig::new(endpoint, reply_object).with_thread_names(features::DEBUG_BUILD);
    if let Err(err) = config.load(&tables) {
        fatal(&MonitorError::from(err));
    }
    config
}

fn expected_untypeds() -> UntypedInfo<'static> {
    // SAFETY: read-only view of a patched static.
    let info = unsafe { &*addr_of!(untyped_info) };
    let count = (info.cap_end.saturating_sub(info.cap_start) as usize).min(MAX_UNTYPED_REGIONS);
    UntypedInfo {
        cap_start: info.cap_start,
        cap_end: info.cap_end,
        regions: &info.regions[..count],
    }
}

fn boot_untypeds<'a>(
    bootinfo: &sys::seL4_BootInfo,
    regions: &'a mut [UntypedRegion; MAX_UNTYPED_REGIONS],
) -> BootUntypeds<'a> {
    let descs = bootinfo.untyped_descs();
    let count = descs.len().min(MAX_UNTYPED_REGIONS);
    for (region, desc) in regions.iter_mut().zip(&descs[..count]) {
        *region = UntypedRegion::new(
            desc.paddr,
            Word::from(desc.sizeBits),
            desc.isDevice != 0,
        );
    }
    BootUntypeds {
        cap_start: bootinfo.untyped.start,
        cap_end: bootinfo.untyped.end,
        regions: &regions[..count],
    }
}

fn bootstrap_buffer() -> InvocationBuffer<'static> {
    // SAFETY: read-only views of patched statics.
    let (count, words) = unsafe {
        (
            patched_word(addr_of!(bootstrap_invocation_count)) as usize,
            &*addr_of!(bootstrap_invocation_data),
        )
    };
    InvocationBuffer::new(words, count)
}

/// View of the system invocation data. Only valid once the bootstrap pass has
/// mapped it at [`SYSTEM_INVOCATION_VADDR`].
fn system_buffer() -> InvocationBuffer<'static> {
    // SAFETY: the bootstrap pass maps `len` words at the fixed address.
    let (count, words) = unsafe {
        let count = patched_word(addr_of!(system_invocation_count)) as usize;
        let len = patched_word(addr_of!(system_invocation_words)) as usize;
        (
            count,
            slice::from_raw_parts(SYSTEM_INVOCATION_VADDR as *const Word, len),
        )
    };
    if count > 0 && words.is_empty() {
        log::error!(
            "system_invocation_words was not patched; {count} system invocations have no data"
        );
    }
    InvocationBuffer::new(words, count)
}

/// [`Kernel`] backed by real seL4 system calls.
#[derive(Debug, Default)]
pub struct Sel4Kernel;

impl Invoke for Sel4Kernel {
    fn invoke(&mut self, call: &EffectiveCall) -> InvocationReply {
        let mrs = call.mrs();
        let mut fast = [0 as Word; FAST_MESSAGE_REGISTERS];
        for (slot, value) in fast.iter_mut().zip(mrs) {
            *slot = *value;
        }
        // SAFETY: the IPC buffer was installed in `sel4_start`; decoding bounds
        // caps and mrs to the buffer's capacity.
        let info = unsafe {
            for (slot, cap) in call.caps().iter().enumerate() {
                sys::seL4_SetCap(slot, *cap);
            }
            for (index, value) in mrs.iter().enumerate().skip(FAST_MESSAGE_REGISTERS) {
                sys::seL4_SetMR(index, *value);
            }
            let [mr0, mr1, mr2, mr3] = &mut fast;
            sys::seL4_CallWithMRs(
                call.service,
                sys::seL4_MessageInfo::from_word(call.tag.word()),
                mr0,
                mr1,
                mr2,
                mr3,
            )
        };
        InvocationReply {
            status: info.label(),
            mrs: fast,
        }
    }
}

impl Kernel for Sel4Kernel {
    fn recv(&mut self, endpoint: CPtr, reply_object: CPtr) -> FaultMessage {
        let mut badge: Word = 0;
        let mut mrs = [0 as Word; MAX_FAULT_MRS];
        // SAFETY: the IPC buffer is installed; the kernel writes the message there.
        let info = unsafe {
            let info = sys::seL4_Recv(endpoint, &mut badge, reply_object);
            let length = (info.length() as usize).min(MAX_FAULT_MRS);
            for (index, slot) in mrs[..length].iter_mut().enumerate() {
                *slot = sys::seL4_GetMR(index);
            }
            info
        };
        let length = (info.length() as usize).min(MAX_FAULT_MRS);
        FaultMessage::new(badge, info.label(), &mrs[..length])
    }

    fn read_registers(&mut self, tcb: CPtr, out: &mut [Word]) -> Result<(), Word> {
        // SAFETY: `out` has room for the requested count.
        let status = unsafe {
            sys::seL4_TCB_ReadRegisters(tcb, false, 0, out.len() as Word, out.as_mut_ptr())
        };
        if status == sys::seL4_NoError {
            Ok(())
        } else {
            Err(status)
        }
    }

    fn sched_context_unbind_object(&mut self, sched_context: CPtr, object: CPtr) -> Word {
        // SAFETY: capability arguments only.
        unsafe { sys::seL4_SchedContext_UnbindObject(sched_context, object) }
    }

    fn sched_context_bind(&mut self, sched_context: CPtr, object: CPtr) -> Word {
        // SAFETY: capability arguments only.
        unsafe { sys::seL4_SchedContext_Bind(sched_context, object) }
    }

    fn name_thread(&mut self, tcb: CPtr, name: &str) {
        if !features::DEBUG_BUILD {
            log::debug!("thread naming unavailable for {tcb:#x} ({name})");
            return;
        }
        // SAFETY: the name is copied into the IPC buffer, truncated to fit.
        unsafe { sys::seL4_DebugNameThread(tcb, name.as_bytes()) }
    }
}

/// Entry point called by `sel4-runtime` once the boot stack is in place.
#[no_mangle]
pub extern "C" fn sel4_start(bootinfo: *const sys::seL4_BootInfo) -> ! {
    // SAFETY: the kernel maps the boot info frame for the initial thread.
    let Some(bootinfo) = (unsafe { bootinfo.as_ref() }) else {
        panic!("kernel passed no boot info");
    };
    // SAFETY: the kernel-provided IPC buffer stays mapped for our lifetime.
    unsafe { sys::seL4_SetIPCBuffer(bootinfo.ipcBuffer) };
    install_logger();
    log::info!("{}", features::summary());

    let config = CONFIG.call_once(load_config);
    let expected = expected_untypeds();
    let mut boot_regions = [UntypedRegion::default(); MAX_UNTYPED_REGIONS];
    let boot_table = boot_untypeds(bootinfo, &mut boot_regions);

    let mut kernel = Sel4Kernel;
    match boot::bootstrap(
        &mut kernel,
        config,
        &expected,
        &boot_table,
        &bootstrap_buffer(),
        system_buffer,
    ) {
        Ok(summary) => log::debug!("boot summary: {summary:?}"),
        Err(err) => fatal(&err),
    }

    FaultMonitor::<_, NativeDecoder>::new(kernel, config).run()
}
