// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Receive and dispatch faults from every component for the life of the system.
// Author: Lukas Bower

//! The fault monitor loop.
//!
//! Components fault to a single endpoint badged with their index. A null fault
//! from a component is a request to become passive; everything else is a
//! genuine fault that is reported and left unanswered, so the faulting thread
//! stays blocked.

use core::marker::PhantomData;

use heapless::Vec as HeaplessVec;

use crate::abi::{error_name, Badge, CPtr, Word, NO_ERROR};
use crate::config::MonitorConfig;
use crate::error::{fatal, MonitorError};
use crate::fault::{decode, FaultDecoder, FaultLabel, FaultMessage, FaultReport};
use crate::registry::MAX_COMPONENTS;
use crate::replay::Invoke;

/// Largest register context any supported architecture reports.
pub const MAX_CONTEXT_WORDS: usize = 36;

/// States one cycle can pass through, including the return to waiting.
const CYCLE_STATES: usize = 4;

/// Kernel services the monitor uses beyond plain invocations.
pub trait Kernel: Invoke {
    /// Block until a message arrives on `endpoint`.
    fn recv(&mut self, endpoint: CPtr, reply: CPtr) -> FaultMessage;

    /// Read the user context of `tcb` into `out`. Returns the seL4 error code on failure.
    fn read_registers(&mut self, tcb: CPtr, out: &mut [Word]) -> Result<(), Word>;

    /// Detach `sched_context` from `object`. Returns an seL4 error code.
    fn sched_context_unbind_object(&mut self, sched_context: CPtr, object: CPtr) -> Word;

    /// Attach `sched_context` to `object`. Returns an seL4 error code.
    fn sched_context_bind(&mut self, sched_context: CPtr, object: CPtr) -> Word;

    /// Give `tcb` a debug name.
    fn name_thread(&mut self, tcb: CPtr, name: &str);
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Blocked on the fault endpoint.
    Waiting,
    /// Classifying a received message.
    Dispatching,
    /// Reporting a genuine fault.
    Reporting,
}

impl MonitorState {
    /// Lower-case state name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Dispatching => "dispatching",
            Self::Reporting => "reporting",
        }
    }
}

/// Result of one receive/dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<C> {
    /// The component's scheduling context now drives its notification.
    BecamePassive {
        /// Component badge.
        badge: Badge,
    },
    /// Binding to the notification failed; the component stays active.
    PassiveRebindFailed {
        /// Component badge.
        badge: Badge,
        /// seL4 error code of the bind.
        status: Word,
    },
    /// A genuine fault was reported.
    Reported {
        /// Component badge.
        badge: Badge,
        /// Decoded fault.
        report: FaultReport<C>,
    },
}

/// Fault monitor bound to a kernel, a configuration and a decoder.
pub struct FaultMonitor<'c, K, D> {
    kernel: K,
    config: &'c MonitorConfig,
    state: MonitorState,
    cycle: HeaplessVec<MonitorState, CYCLE_STATES>,
    decoder: PhantomData<D>,
}

impl<'c, K: Kernel, D: FaultDecoder> FaultMonitor<'c, K, D> {
    /// Create a monitor in the waiting state.
    pub fn new(kernel: K, config: &'c MonitorConfig) -> Self {
        Self {
            kernel,
            config,
            state: MonitorState::Waiting,
            cycle: HeaplessVec::new(),
            decoder: PhantomData,
        }
    }

    /// Current state. After a fatal error this is the state the error was raised in.
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// States entered by the most recent [`step`](Self::step), in order.
    pub fn last_cycle(&self) -> &[MonitorState] {
        &self.cycle
    }

    /// Borrow the kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Receive one message and handle it.
    pub fn step(&mut self) -> Result<Outcome<D::VmCause>, MonitorError> {
        self.cycle.clear();
        self.enter(MonitorState::Waiting);
        let msg = self.kernel.recv(self.config.fault_ep, self.config.reply);
        self.enter(MonitorState::Dispatching);

        let label = FaultLabel::from_raw(msg.label());
        let outcome = if label == FaultLabel::Null && (msg.badge as usize) < MAX_COMPONENTS {
            self.become_passive(msg.badge)
        } else {
            self.report(&msg)?
        };
        self.enter(MonitorState::Waiting);
        Ok(outcome)
    }

    /// Handle messages forever, halting on the first fatal error.
    pub fn run(mut self) -> ! {
        log::info!("fault monitor running ({})", D::ARCH);
        loop {
            if let Err(err) = self.step() {
                fatal(&err);
            }
        }
    }

    fn enter(&mut self, next: MonitorState) {
        log::trace!("monitor: {} -> {}", self.state.label(), next.label());
        self.state = next;
        // Cleared at the start of every cycle, which enters at most CYCLE_STATES states.
        let _ = self.cycle.push(next);
    }

    fn become_passive(&mut self, badge: Badge) -> Outcome<D::VmCause> {
        let (tcb, sched_context, notification, name) = match self.config.registry.slot(badge) {
            Some(slot) => (
                slot.tcb,
                slot.sched_context,
                slot.notification,
                slot.name.as_str(),
            ),
            None => (0, 0, 0, ""),
        };

        let status = self.kernel.sched_context_unbind_object(sched_context, tcb);
        if status != NO_ERROR {
            log::warn!(
                "could not unbind scheduling context of badge {badge:#x}: {}",
                error_name(status)
            );
        }
        let status = self.kernel.sched_context_bind(sched_context, notification);
        if status != NO_ERROR {
            log::error!("could not bind scheduling context to notification object");
            return Outcome::PassiveRebindFailed { badge, status };
        }
        log::info!("PD '{name}' is now passive!");
        Outcome::BecamePassive { badge }
    }

    fn report(&mut self, msg: &FaultMessage) -> Result<Outcome<D::VmCause>, MonitorError> {
        let badge = msg.badge;
        let tcb = self.config.registry.slot(badge).map_or(0, |slot| slot.tcb);
        log::error!(
            "received message {:#010x}  badge: {badge:#018x}  tcb cap: {tcb:#018x}",
            msg.label()
        );
        let component = self
            .config
            .registry
            .get(badge)
            .ok_or(MonitorError::UnknownBadge {
                badge,
                label: msg.label(),
            })?;
        log::error!("faulting PD: {}", component.name);

        self.enter(MonitorState::Reporting);
        let mut context = [0 as Word; MAX_CONTEXT_WORDS];
        let count = D::REGISTER_NAMES.len().min(MAX_CONTEXT_WORDS);
        self.kernel
            .read_registers(component.tcb, &mut context[..count])
            .map_err(|status| MonitorError::ReadRegisters {
                badge,
                tcb: component.tcb,
                status,
            })?;
        log::error!("Registers:");
        for (name, value) in D::REGISTER_NAMES.iter().zip(&context[..count]) {
            log::error!("{name} : {value:#018x}");
        }

        let report = decode::<D>(msg, component.stack_base);
        report.log();
        Ok(Outcome::Reported { badge, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::fault_type;
    use crate::fault::aarch64::Aarch64Decoder;
    use crate::invocation::EffectiveCall;
    use crate::registry::{name_from_bytes, Component};
    use crate::replay::InvocationReply;
    use std::collections::VecDeque;
    use std::vec::Vec;

    type Decoder = Aarch64Decoder<false>;

    const INVALID_CAPABILITY: Word = 2;

    #[derive(Default)]
    struct Scripted {
        inbox: VecDeque<FaultMessage>,
        bind_status: Word,
        unbind_status: Word,
        register_status: Option<Word>,
        binds: Vec<(CPtr, CPtr)>,
        unbinds: Vec<(CPtr, CPtr)>,
        register_reads: Vec<CPtr>,
    }

    impl Invoke for Scripted {
        fn invoke(&mut self, _call: &EffectiveCall) -> InvocationReply {
            InvocationReply::ok()
        }
    }

    impl Kernel for Scripted {
        fn recv(&mut self, _endpoint: CPtr, _reply: CPtr) -> FaultMessage {
            self.inbox.pop_front().expect("scripted message")
        }

        fn read_registers(&mut self, tcb: CPtr, out: &mut [Word]) -> Result<(), Word> {
            self.register_reads.push(tcb);
            match self.register_status {
                Some(status) => Err(status),
                None => {
                    out.fill(0);
                    Ok(())
                }
            }
        }

        fn sched_context_unbind_object(&mut self, sched_context: CPtr, object: CPtr) -> Word {
            self.unbinds.push((sched_context, object));
            self.unbind_status
        }

        fn sched_context_bind(&mut self, sched_context: CPtr, object: CPtr) -> Word {
            self.binds.push((sched_context, object));
            self.bind_status
        }

        fn name_thread(&mut self, _tcb: CPtr, _name: &str) {}
    }

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::new(0x10, 0x11);
        config
            .registry
            .register(
                3,
                Component {
                    name: name_from_bytes(b"net"),
                    tcb: 0x103,
                    stack_base: 0x0100_0000,
                    sched_context: 0x203,
                    notification: 0x303,
                },
            )
            .expect("register");
        config
    }

    fn monitor_with(kernel: Scripted, config: &MonitorConfig) -> FaultMonitor<'_, Scripted, Decoder> {
        FaultMonitor::new(kernel, config)
    }

    #[test]
    fn null_fault_rebinds_scheduling_context() {
        let config = config();
        let mut kernel = Scripted::default();
        kernel.inbox.push_back(FaultMessage::new(3, fault_type::NULL_FAULT, &[]));
        let mut monitor = monitor_with(kernel, &config);

        let outcome = monitor.step().expect("step");
        assert_eq!(outcome, Outcome::BecamePassive { badge: 3 });
        assert_eq!(monitor.kernel().unbinds, [(0x203, 0x103)]);
        assert_eq!(monitor.kernel().binds, [(0x203, 0x303)]);
        assert_eq!(monitor.state(), MonitorState::Waiting);
        assert_eq!(
            monitor.last_cycle(),
            [
                MonitorState::Waiting,
                MonitorState::Dispatching,
                MonitorState::Waiting
            ]
        );
    }

    #[test]
    fn failed_bind_is_not_fatal() {
        let config = config();
        let mut kernel = Scripted {
            bind_status: INVALID_CAPABILITY,
            unbind_status: INVALID_CAPABILITY,
            ..Scripted::default()
        };
        kernel.inbox.push_back(FaultMessage::new(3, fault_type::NULL_FAULT, &[]));
        let mut monitor = monitor_with(kernel, &config);

        let outcome = monitor.step().expect("step");
        assert_eq!(
            outcome,
            Outcome::PassiveRebindFailed {
                badge: 3,
                status: INVALID_CAPABILITY,
            }
        );
        assert_eq!(monitor.state(), MonitorState::Waiting);
    }

    #[test]
    fn genuine_fault_reads_registers_and_decodes() {
        let config = config();
        let mut kernel = Scripted::default();
        kernel.inbox.push_back(FaultMessage::new(
            3,
            fault_type::USER_EXCEPTION,
            &[0x4000, 0x0100_0000 - 0x20],
        ));
        let mut monitor = monitor_with(kernel, &config);

        let outcome = monitor.step().expect("step");
        assert_eq!(
            outcome,
            Outcome::Reported {
                badge: 3,
                report: FaultReport::UserException {
                    ip: 0x4000,
                    sp: 0x0100_0000 - 0x20,
                },
            }
        );
        assert_eq!(monitor.kernel().register_reads, [0x103]);
        assert_eq!(monitor.state(), MonitorState::Waiting);
        assert_eq!(
            monitor.last_cycle(),
            [
                MonitorState::Waiting,
                MonitorState::Dispatching,
                MonitorState::Reporting,
                MonitorState::Waiting
            ]
        );
    }

    #[test]
    fn unknown_badge_is_fatal() {
        let config = config();
        let mut kernel = Scripted::default();
        kernel.inbox.push_back(FaultMessage::new(9, fault_type::VM_FAULT, &[0, 0, 0, 0]));
        let mut monitor = monitor_with(kernel, &config);

        let err = monitor.step().expect_err("unregistered badge");
        assert_eq!(
            err,
            MonitorError::UnknownBadge {
                badge: 9,
                label: fault_type::VM_FAULT,
            }
        );
        assert!(monitor.kernel().register_reads.is_empty());
        assert_eq!(monitor.state(), MonitorState::Dispatching);
    }

    #[test]
    fn register_read_failure_is_fatal() {
        let config = config();
        let mut kernel = Scripted {
            register_status: Some(INVALID_CAPABILITY),
            ..Scripted::default()
        };
        kernel.inbox.push_back(FaultMessage::new(3, fault_type::CAP_FAULT, &[0; 7]));
        let mut monitor = monitor_with(kernel, &config);

        let err = monitor.step().expect_err("read failure");
        assert_eq!(
            err,
            MonitorError::ReadRegisters {
                badge: 3,
                tcb: 0x103,
                status: INVALID_CAPABILITY,
            }
        );
        assert_eq!(monitor.state(), MonitorState::Reporting);
    }

    #[test]
    fn null_fault_from_out_of_range_badge_is_reported() {
        let config = config();
        let mut kernel = Scripted::default();
        kernel
            .inbox
            .push_back(FaultMessage::new(MAX_COMPONENTS as Badge, fault_type::NULL_FAULT, &[]));
        let mut monitor = monitor_with(kernel, &config);

        assert!(matches!(
            monitor.step(),
            Err(MonitorError::UnknownBadge { badge, .. }) if badge == MAX_COMPONENTS as Badge
        ));
        assert!(monitor.kernel().binds.is_empty());
    }

    #[test]
    fn vm_fault_uses_the_component_stack_base() {
        let config = config();
        let stack_base = 0x0100_0000;
        let mut kernel = Scripted::default();
        for addr in [stack_base - 1, stack_base - 0x1001] {
            kernel
                .inbox
                .push_back(FaultMessage::new(3, fault_type::VM_FAULT, &[0x4000, addr, 0, 0x9200_0047]));
        }
        let mut monitor = monitor_with(kernel, &config);

        for expected in [true, false] {
            match monitor.step().expect("step") {
                Outcome::Reported {
                    badge: 3,
                    report: FaultReport::Vm { stack_overflow, .. },
                } => assert_eq!(stack_overflow, expected),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(monitor.kernel().register_reads, [0x103, 0x103]);
    }

    #[test]
    fn each_step_starts_a_new_cycle() {
        let config = config();
        let mut kernel = Scripted::default();
        kernel.inbox.push_back(FaultMessage::new(3, fault_type::USER_EXCEPTION, &[0, 0]));
        kernel.inbox.push_back(FaultMessage::new(3, fault_type::NULL_FAULT, &[]));
        let mut monitor = monitor_with(kernel, &config);
        assert!(monitor.last_cycle().is_empty());

        monitor.step().expect("fault");
        assert_eq!(monitor.last_cycle().len(), 4);
        monitor.step().expect("passive");
        assert_eq!(monitor.last_cycle().len(), 3);
        assert_eq!(MonitorState::Dispatching.label(), "dispatching");
    }
}
