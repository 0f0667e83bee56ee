// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: seL4 MCS bindings for the monitor (AArch64 and RISC-V 64).
// Author: Lukas Bower
#![cfg_attr(target_os = "none", no_std)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]
#![allow(clippy::missing_safety_doc)]

//! Minimal seL4 bindings.
//!
//! Only the pieces the monitor needs are covered: the boot info layout, the
//! IPC buffer, the MCS system calls it issues and the handful of object
//! invocations it performs itself. Everything else reaches the kernel through
//! `seL4_CallWithMRs` with arguments prepared by the system build tool.
//!
//! System call numbers and invocation labels are generated by `build.rs` from
//! the libsel4 headers of the kernel build, so they follow the kernel's
//! configuration. Host builds get the upstream MCS numbering, the same types,
//! and functions that panic when called.

use static_assertions::const_assert_eq;

#[cfg(all(target_os = "none", not(sel4_config_kernel_mcs)))]
compile_error!("sel4-sys only supports MCS kernels (CONFIG_KERNEL_MCS)");

include!(concat!(env!("OUT_DIR"), "/sel4_config_consts.rs"));

mod generated {
    #![allow(dead_code, non_camel_case_types, non_upper_case_globals, clippy::all)]
    include!(concat!(env!("OUT_DIR"), "/sel4_abi.rs"));
}

pub type seL4_Word = u64;
pub type seL4_CPtr = seL4_Word;
pub type seL4_Uint8 = u8;
pub type seL4_Error = seL4_Word;
pub type seL4_TCB = seL4_CPtr;
pub type seL4_SchedContext = seL4_CPtr;

pub const seL4_NoError: seL4_Error = 0;

pub const seL4_MsgMaxLength: usize = 120;
pub const seL4_MsgMaxExtraCaps: usize = 3;
pub const seL4_FastMessageRegisters: usize = 4;
pub const seL4_IPCBufferSizeBits: usize = 10;

pub const seL4_CapInitThreadTCB: seL4_CPtr = 1;

// System call numbers, sign-extended to a register word.
pub const seL4_SysCall: seL4_Word = generated::seL4_SysCall as seL4_Word;
pub const seL4_SysRecv: seL4_Word = generated::seL4_SysRecv as seL4_Word;
pub const seL4_SysDebugPutChar: seL4_Word = generated::seL4_SysDebugPutChar as seL4_Word;
pub const seL4_SysDebugNameThread: seL4_Word = generated::seL4_SysDebugNameThread as seL4_Word;

// Generic invocation labels.
pub const TCBReadRegisters: seL4_Word = generated::TCBReadRegisters as seL4_Word;
pub const TCBSuspend: seL4_Word = generated::TCBSuspend as seL4_Word;
pub const SchedContextBind: seL4_Word = generated::SchedContextBind as seL4_Word;
pub const SchedContextUnbindObject: seL4_Word =
    generated::SchedContextUnbindObject as seL4_Word;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct seL4_MessageInfo {
    pub words: [seL4_Word; 1],
}

impl seL4_MessageInfo {
    #[inline(always)]
    pub const fn new(
        label: seL4_Word,
        caps_unwrapped: seL4_Word,
        extra_caps: seL4_Word,
        length: seL4_Word,
    ) -> Self {
        let mut value: seL4_Word = 0;
        value |= (label & 0x000f_ffff_ffff_ffff) << 12;
        value |= (caps_unwrapped & 0x7) << 9;
        value |= (extra_caps & 0x3) << 7;
        value |= length & 0x7f;
        Self { words: [value] }
    }

    #[inline(always)]
    pub const fn from_word(word: seL4_Word) -> Self {
        Self { words: [word] }
    }

    #[inline(always)]
    pub const fn label(self) -> seL4_Word {
        self.words[0] >> 12
    }

    #[inline(always)]
    pub const fn extra_caps(self) -> seL4_Word {
        (self.words[0] >> 7) & 0x3
    }

    #[inline(always)]
    pub const fn length(self) -> seL4_Word {
        self.words[0] & 0x7f
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct seL4_IPCBuffer {
    pub tag: seL4_MessageInfo,
    pub msg: [seL4_Word; seL4_MsgMaxLength],
    pub userData: seL4_Word,
    pub caps_or_badges: [seL4_Word; seL4_MsgMaxExtraCaps],
    pub receiveCNode: seL4_CPtr,
    pub receiveIndex: seL4_CPtr,
    pub receiveDepth: seL4_Word,
}

const_assert_eq!(
    core::mem::size_of::<seL4_IPCBuffer>(),
    1 << seL4_IPCBufferSizeBits
);

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct seL4_SlotRegion {
    pub start: seL4_CPtr,
    pub end: seL4_CPtr,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct seL4_UntypedDesc {
    pub paddr: seL4_Word,
    pub sizeBits: seL4_Uint8,
    pub isDevice: seL4_Uint8,
    pub padding: [seL4_Uint8; core::mem::size_of::<seL4_Word>() - 2],
}

const_assert_eq!(core::mem::size_of::<seL4_UntypedDesc>(), 16);

/// Boot info frame of an MCS kernel.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct seL4_BootInfo {
    pub extraLen: seL4_Word,
    pub nodeID: seL4_Word,
    pub numNodes: seL4_Word,
    pub numIOPTLevels: seL4_Word,
    pub ipcBuffer: *mut seL4_IPCBuffer,
    pub empty: seL4_SlotRegion,
    pub sharedFrames: seL4_SlotRegion,
    pub userImageFrames: seL4_SlotRegion,
    pub userImagePaging: seL4_SlotRegion,
    pub ioSpaceCaps: seL4_SlotRegion,
    pub extraBIPages: seL4_SlotRegion,
    pub initThreadCNodeSizeBits: seL4_Word,
    pub initThreadDomain: seL4_Word,
    pub schedcontrol: seL4_SlotRegion,
    pub untyped: seL4_SlotRegion,
    pub untypedList: [seL4_UntypedDesc; MAX_BOOTINFO_UNTYPEDS],
}

impl seL4_BootInfo {
    /// Untyped descriptors covered by the `untyped` slot region.
    pub fn untyped_descs(&self) -> &[seL4_UntypedDesc] {
        let count = self.untyped.end.saturating_sub(self.untyped.start) as usize;
        &self.untypedList[..count.min(MAX_BOOTINFO_UNTYPEDS)]
    }
}

pub use seL4_BootInfo as BootInfo;
pub use seL4_UntypedDesc as UntypedDesc;

#[cfg(target_os = "none")]
mod imp {
    use core::arch::asm;
    use core::ptr;
    use core::sync::atomic::{AtomicPtr, Ordering};

    use super::*;

    static IPC_BUFFER: AtomicPtr<seL4_IPCBuffer> = AtomicPtr::new(ptr::null_mut());

    #[inline(always)]
    pub unsafe fn seL4_SetIPCBuffer(buffer: *mut seL4_IPCBuffer) {
        IPC_BUFFER.store(buffer, Ordering::Release);
    }

    #[inline(always)]
    fn ipc_buffer() -> *mut seL4_IPCBuffer {
        IPC_BUFFER.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub unsafe fn seL4_GetMR(index: usize) -> seL4_Word {
        (*ipc_buffer()).msg[index]
    }

    #[inline(always)]
    pub unsafe fn seL4_SetMR(index: usize, value: seL4_Word) {
        (*ipc_buffer()).msg[index] = value;
    }

    #[inline(always)]
    pub unsafe fn seL4_SetCap(slot: usize, cptr: seL4_CPtr) {
        (*ipc_buffer()).caps_or_badges[slot] = cptr;
    }

    /// Raw system call. `mrs` carries the fast message registers in and out.
    /// Returns `(badge, info)` as left in the first two argument registers.
    #[cfg(target_arch = "aarch64")]
    #[inline(always)]
    unsafe fn sys_send_recv(
        sys: seL4_Word,
        dest: seL4_Word,
        info: seL4_Word,
        mrs: &mut [seL4_Word; seL4_FastMessageRegisters],
        reply: seL4_Word,
    ) -> (seL4_Word, seL4_Word) {
        let mut dest = dest;
        let mut info = info;
        asm!(
            "svc #0",
            inout("x0") dest,
            inout("x1") info,
            inout("x2") mrs[0],
            inout("x3") mrs[1],
            inout("x4") mrs[2],
            inout("x5") mrs[3],
            in("x6") reply,
            in("x7") sys,
            options(nostack)
        );
        (dest, info)
    }

    #[cfg(target_arch = "riscv64")]
    #[inline(always)]
    unsafe fn sys_send_recv(
        sys: seL4_Word,
        dest: seL4_Word,
        info: seL4_Word,
        mrs: &mut [seL4_Word; seL4_FastMessageRegisters],
        reply: seL4_Word,
    ) -> (seL4_Word, seL4_Word) {
        let mut dest = dest;
        let mut info = info;
        asm!(
            "ecall",
            inout("a0") dest,
            inout("a1") info,
            inout("a2") mrs[0],
            inout("a3") mrs[1],
            inout("a4") mrs[2],
            inout("a5") mrs[3],
            in("a6") reply,
            in("a7") sys,
            options(nostack)
        );
        (dest, info)
    }

    unsafe fn store_fast_mrs(mrs: &[seL4_Word; seL4_FastMessageRegisters], length: seL4_Word) {
        for (index, value) in mrs.iter().enumerate() {
            if (index as seL4_Word) < length {
                seL4_SetMR(index, *value);
            }
        }
    }

    /// `seL4_Call` with the first four message registers passed in and out
    /// through `mr0..mr3`. Null pointers are treated as zero and not written.
    #[inline(always)]
    pub unsafe fn seL4_CallWithMRs(
        dest: seL4_CPtr,
        msg_info: seL4_MessageInfo,
        mr0: *mut seL4_Word,
        mr1: *mut seL4_Word,
        mr2: *mut seL4_Word,
        mr3: *mut seL4_Word,
    ) -> seL4_MessageInfo {
        let slots = [mr0, mr1, mr2, mr3];
        let mut mrs = [0; seL4_FastMessageRegisters];
        for (index, (value, slot)) in mrs.iter_mut().zip(slots).enumerate() {
            if !slot.is_null() && (index as seL4_Word) < msg_info.length() {
                *value = *slot;
            }
        }

        let (_, info) = sys_send_recv(seL4_SysCall, dest, msg_info.words[0], &mut mrs, 0);

        for (value, slot) in mrs.iter().zip(slots) {
            if !slot.is_null() {
                *slot = *value;
            }
        }
        seL4_MessageInfo::from_word(info)
    }

    /// MCS `seL4_Recv`: blocks on `src`, leaving the message registers in the IPC buffer.
    #[inline(always)]
    pub unsafe fn seL4_Recv(
        src: seL4_CPtr,
        sender: *mut seL4_Word,
        reply: seL4_CPtr,
    ) -> seL4_MessageInfo {
        let mut mrs = [0; seL4_FastMessageRegisters];
        let (badge, info) = sys_send_recv(seL4_SysRecv, src, 0, &mut mrs, reply);
        let info = seL4_MessageInfo::from_word(info);
        store_fast_mrs(&mrs, info.length());
        if !sender.is_null() {
            *sender = badge;
        }
        info
    }

    /// Read `count` words of `service`'s user context into `regs`.
    pub unsafe fn seL4_TCB_ReadRegisters(
        service: seL4_TCB,
        suspend_source: bool,
        arch_flags: seL4_Word,
        count: seL4_Word,
        regs: *mut seL4_Word,
    ) -> seL4_Error {
        let mut mr0 = seL4_Word::from(suspend_source) | ((arch_flags & 0xff) << 8);
        let mut mr1 = count;
        let mut mr2 = 0;
        let mut mr3 = 0;
        let tag = seL4_MessageInfo::new(TCBReadRegisters, 0, 0, 2);
        let reply = seL4_CallWithMRs(service, tag, &mut mr0, &mut mr1, &mut mr2, &mut mr3);
        let status = reply.label();
        if status != seL4_NoError {
            return status;
        }
        let fast = [mr0, mr1, mr2, mr3];
        let total = (count as usize).min(seL4_MsgMaxLength);
        for index in 0..total {
            let value = match fast.get(index) {
                Some(value) => *value,
                None => seL4_GetMR(index),
            };
            *regs.add(index) = value;
        }
        seL4_NoError
    }

    #[inline(always)]
    pub unsafe fn seL4_TCB_Suspend(service: seL4_TCB) -> seL4_Error {
        let tag = seL4_MessageInfo::new(TCBSuspend, 0, 0, 0);
        seL4_CallWithMRs(
            service,
            tag,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
        )
        .label()
    }

    unsafe fn sched_context_with_cap(
        label: seL4_Word,
        service: seL4_SchedContext,
        cap: seL4_CPtr,
    ) -> seL4_Error {
        seL4_SetCap(0, cap);
        let tag = seL4_MessageInfo::new(label, 0, 1, 0);
        seL4_CallWithMRs(
            service,
            tag,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
        )
        .label()
    }

    #[inline(always)]
    pub unsafe fn seL4_SchedContext_Bind(
        service: seL4_SchedContext,
        cap: seL4_CPtr,
    ) -> seL4_Error {
        sched_context_with_cap(SchedContextBind, service, cap)
    }

    #[inline(always)]
    pub unsafe fn seL4_SchedContext_UnbindObject(
        service: seL4_SchedContext,
        cap: seL4_CPtr,
    ) -> seL4_Error {
        sched_context_with_cap(SchedContextUnbindObject, service, cap)
    }

    #[inline(always)]
    pub unsafe fn seL4_DebugPutChar(c: u8) {
        let mut mrs = [0; seL4_FastMessageRegisters];
        sys_send_recv(seL4_SysDebugPutChar, seL4_Word::from(c), 0, &mut mrs, 0);
    }

    /// Name `tcb` for kernel debug output. The name is truncated to fit the
    /// IPC buffer and NUL-terminated there.
    pub unsafe fn seL4_DebugNameThread(tcb: seL4_TCB, name: &[u8]) {
        let buffer = ipc_buffer();
        let dest = (*buffer).msg.as_mut_ptr().cast::<u8>();
        let capacity = seL4_MsgMaxLength * core::mem::size_of::<seL4_Word>() - 1;
        let len = name.len().min(capacity);
        ptr::copy_nonoverlapping(name.as_ptr(), dest, len);
        *dest.add(len) = 0;
        let mut mrs = [0; seL4_FastMessageRegisters];
        sys_send_recv(seL4_SysDebugNameThread, tcb, 0, &mut mrs, 0);
    }
}

#[cfg(target_os = "none")]
pub use imp::*;

#[cfg(not(target_os = "none"))]
mod host_stub {
    use super::*;

    #[inline(always)]
    fn unsupported() -> ! {
        panic!("sel4-sys stubs must not be used on host targets");
    }

    pub unsafe fn seL4_SetIPCBuffer(_buffer: *mut seL4_IPCBuffer) {
        unsupported();
    }

    pub unsafe fn seL4_GetMR(_index: usize) -> seL4_Word {
        unsupported();
    }

    pub unsafe fn seL4_SetMR(_index: usize, _value: seL4_Word) {
        unsupported();
    }

    pub unsafe fn seL4_SetCap(_slot: usize, _cptr: seL4_CPtr) {
        unsupported();
    }

    pub unsafe fn seL4_CallWithMRs(
        _dest: seL4_CPtr,
        _msg_info: seL4_MessageInfo,
        _mr0: *mut seL4_Word,
        _mr1: *mut seL4_Word,
        _mr2: *mut seL4_Word,
        _mr3: *mut seL4_Word,
    ) -> seL4_MessageInfo {
        unsupported();
    }

    pub unsafe fn seL4_Recv(
        _src: seL4_CPtr,
        _sender: *mut seL4_Word,
        _reply: seL4_CPtr,
    ) -> seL4_MessageInfo {
        unsupported();
    }

    pub unsafe fn seL4_TCB_ReadRegisters(
        _service: seL4_TCB,
        _suspend_source: bool,
        _arch_flags: seL4_Word,
        _count: seL4_Word,
        _regs: *mut seL4_Word,
    ) -> seL4_Error {
        unsupported();
    }

    pub unsafe fn seL4_TCB_Suspend(_service: seL4_TCB) -> seL4_Error {
        unsupported();
    }

    pub unsafe fn seL4_SchedContext_Bind(
        _service: seL4_SchedContext,
        _cap: seL4_CPtr,
    ) -> seL4_Error {
        unsupported();
    }

    pub unsafe fn seL4_SchedContext_UnbindObject(
        _service: seL4_SchedContext,
        _cap: seL4_CPtr,
    ) -> seL4_Error {
        unsupported();
    }

    pub unsafe fn seL4_DebugPutChar(_c: u8) {
        unsupported();
    }

    pub unsafe fn seL4_DebugNameThread(_tcb: seL4_TCB, _name: &[u8]) {
        unsupported();
    }
}

#[cfg(not(target_os = "none"))]
pub use host_stub::*;
