// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host-mode kernel simulation and demo entry point for the monitor.
// Author: Lukas Bower

//! Host simulation.
//!
//! [`SimKernel`] stands in for seL4: it records every invocation, fails on
//! request and replays scripted fault messages. The demo in [`main`] builds a
//! small image, boots it and dispatches a few faults.

#![allow(clippy::module_name_repetitions)]

use std::collections::{HashMap, VecDeque};
use std::string::String;
use std::vec::Vec;

use anyhow::Result as AnyhowResult;

use crate::abi::{fault_type, lookup_failure, CPtr, Word};
use crate::boot::bootstrap;
use crate::config::MonitorConfig;
use crate::fault::{FaultMessage, NativeDecoder};
use crate::invocation::{EffectiveCall, EncodeError, Invocation, RecordEncoder, Repeat};
use crate::monitor::{FaultMonitor, Kernel, Outcome};
use crate::registry::{name_from_bytes, Component, VirtualMachine};
use crate::replay::{InvocationReply, Invoke, BOOTSTRAP_INVOCATION_DATA_SIZE};
use crate::untyped::{UntypedInfo, UntypedRegion};

/// Result alias used throughout the host-mode simulation.
pub type Result<T> = AnyhowResult<T>;

/// Scriptable stand-in for the kernel.
#[derive(Debug, Default)]
pub struct SimKernel {
    calls: Vec<EffectiveCall>,
    fail_at: Option<(usize, Word)>,
    faults: VecDeque<FaultMessage>,
    registers: HashMap<CPtr, Vec<Word>>,
    register_error: Option<Word>,
    unbind_status: Word,
    bind_status: Word,
    unbinds: Vec<(CPtr, CPtr)>,
    binds: Vec<(CPtr, CPtr)>,
    named: Vec<(CPtr, String)>,
}

impl SimKernel {
    /// Kernel that accepts every invocation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the invocation with zero-based index `call` with `status`.
    pub fn fail_at(&mut self, call: usize, status: Word) -> &mut Self {
        self.fail_at = Some((call, status));
        self
    }

    /// Queue a message for a later [`Kernel::recv`].
    pub fn push_fault(&mut self, message: FaultMessage) -> &mut Self {
        self.faults.push_back(message);
        self
    }

    /// Register context returned for `tcb`.
    pub fn set_registers(&mut self, tcb: CPtr, values: &[Word]) -> &mut Self {
        self.registers.insert(tcb, values.to_vec());
        self
    }

    /// Make every register read fail with `status`.
    pub fn fail_register_reads(&mut self, status: Word) -> &mut Self {
        self.register_error = Some(status);
        self
    }

    /// Status returned by scheduling context unbind and bind calls.
    pub fn set_sched_context_status(&mut self, unbind: Word, bind: Word) -> &mut Self {
        self.unbind_status = unbind;
        self.bind_status = bind;
        self
    }

    /// Invocations issued so far, in order.
    #[must_use]
    pub fn calls(&self) -> &[EffectiveCall] {
        &self.calls
    }

    /// `(sched_context, object)` pairs passed to unbind.
    #[must_use]
    pub fn unbinds(&self) -> &[(CPtr, CPtr)] {
        &self.unbinds
    }

    /// `(sched_context, object)` pairs passed to bind.
    #[must_use]
    pub fn binds(&self) -> &[(CPtr, CPtr)] {
        &self.binds
    }

    /// Threads named so far.
    #[must_use]
    pub fn named_threads(&self) -> &[(CPtr, String)] {
        &self.named
    }

    /// Scripted messages not yet received.
    #[must_use]
    pub fn pending_faults(&self) -> usize {
        self.faults.len()
    }
}

impl Invoke for SimKernel {
    fn invoke(&mut self, call: &EffectiveCall) -> InvocationReply {
        let index = self.calls.len();
        self.calls.push(*call);
        match self.fail_at {
            Some((target, status)) if target == index => InvocationReply::error(status),
            _ => InvocationReply::ok(),
        }
    }
}

impl Kernel for SimKernel {
    /// # Panics
    ///
    /// Panics when no scripted message is left; a real receive would block forever.
    fn recv(&mut self, _endpoint: CPtr, _reply: CPtr) -> FaultMessage {
        match self.faults.pop_front() {
            Some(message) => message,
            None => panic!("SimKernel: no scripted fault message left to receive"),
        }
    }

    fn read_registers(&mut self, tcb: CPtr, out: &mut [Word]) -> core::result::Result<(), Word> {
        if let Some(status) = self.register_error {
            return Err(status);
        }
        out.fill(0);
        if let Some(values) = self.registers.get(&tcb) {
            for (slot, value) in out.iter_mut().zip(values) {
                *slot = *value;
            }
        }
        Ok(())
    }

    fn sched_context_unbind_object(&mut self, sched_context: CPtr, object: CPtr) -> Word {
        self.unbinds.push((sched_context, object));
        self.unbind_status
    }

    fn sched_context_bind(&mut self, sched_context: CPtr, object: CPtr) -> Word {
        self.binds.push((sched_context, object));
        self.bind_status
    }

    fn name_thread(&mut self, tcb: CPtr, name: &str) {
        self.named.push((tcb, name.to_owned()));
    }
}

const DEMO_STACK_TOP: Word = 0x0100_0000;
const DEMO_REGIONS: [UntypedRegion; 3] = [
    UntypedRegion::new(0x4000_0000, 24, false),
    UntypedRegion::new(0x4100_0000, 24, false),
    UntypedRegion::new(0x0900_0000, 12, true),
];

fn demo_config() -> Result<MonitorConfig> {
    let mut config = MonitorConfig::new(0x10, 0x11).with_thread_names(true);
    for (badge, name) in [(1, "serial"), (2, "net")] {
        config.registry.register(
            badge,
            Component {
                name: name_from_bytes(name.as_bytes()),
                tcb: 0x100 + badge,
                stack_base: DEMO_STACK_TOP,
                sched_context: 0x200 + badge,
                notification: 0x300 + badge,
            },
        )?;
    }
    config.registry.register_vm(VirtualMachine {
        name: name_from_bytes(b"guest"),
        tcb: 0x400,
    })?;
    Ok(config)
}

type BootstrapData = RecordEncoder<BOOTSTRAP_INVOCATION_DATA_SIZE>;
type SystemData = RecordEncoder<256>;

fn demo_invocations() -> core::result::Result<(BootstrapData, SystemData), EncodeError> {
    let mut bootstrap_data = BootstrapData::new();
    bootstrap_data.push(Invocation {
        service: 0x2,
        label: 0x1,
        caps: &[0x3],
        mrs: &[0x8, 0x1000],
    })?;

    let mut system_data = SystemData::new();
    system_data.push(Invocation {
        service: 0x20,
        label: 0x1,
        caps: &[0x3],
        mrs: &[0x2, 12, 0x40, 1],
    })?;
    system_data.push_repeated(
        Invocation {
            service: 0x40,
            label: 0x9,
            caps: &[0x101],
            mrs: &[0x1000],
        },
        Repeat {
            count: 2,
            service: 1,
            caps: &[1],
            mrs: &[0x1000],
        },
    )?;
    system_data.push(Invocation {
        service: 0x101,
        label: 0x5,
        caps: &[],
        mrs: &[],
    })?;
    Ok((bootstrap_data, system_data))
}

/// Entry point for host-mode execution of the monitor simulation.
pub fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let config = demo_config()?;

    let (bootstrap_data, system_data) = demo_invocations()?;

    let expected = UntypedInfo {
        cap_start: 0x20,
        cap_end: 0x23,
        regions: &DEMO_REGIONS,
    };
    let mut kernel = SimKernel::new();
    let summary = bootstrap(
        &mut kernel,
        &config,
        &expected,
        &expected,
        &bootstrap_data.buffer(),
        || system_data.buffer(),
    )?;
    log::info!("boot summary: {summary:?}");

    kernel
        .set_registers(0x102, &[0x0040_1000, DEMO_STACK_TOP - 0x10])
        .push_fault(FaultMessage::new(1, fault_type::NULL_FAULT, &[]))
        .push_fault(FaultMessage::new(
            2,
            fault_type::VM_FAULT,
            &[0x0040_1000, DEMO_STACK_TOP - 8, 0, 0x9200_0047],
        ))
        .push_fault(FaultMessage::new(
            2,
            fault_type::CAP_FAULT,
            &[0x0040_2000, 0x77, 0, lookup_failure::GUARD_MISMATCH, 30, 0, 2],
        ));

    let mut monitor = FaultMonitor::<_, NativeDecoder>::new(kernel, &config);
    while monitor.kernel().pending_faults() > 0 {
        match monitor.step()? {
            Outcome::BecamePassive { badge } => log::info!("badge {badge} became passive"),
            Outcome::PassiveRebindFailed { badge, status } => {
                log::warn!("badge {badge} stays active (status {status})");
            }
            Outcome::Reported { badge, .. } => log::info!("fault from badge {badge} reported"),
        }
    }
    log::info!(
        "simulation finished after {} invocations",
        monitor.kernel().calls().len()
    );
    Ok(())
}
