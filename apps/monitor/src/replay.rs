// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Replay packed invocation buffers against the kernel.
// Author: Lukas Bower

//! Invocation replay engine.
//!
//! Replays every record of a buffer in order, issuing each iteration as one
//! synchronous kernel call. The first non-zero reply label aborts the pass.

use core::fmt;

use crate::abi::{Word, FAST_MESSAGE_REGISTERS, NO_ERROR};
use crate::error::MonitorError;
use crate::invocation::{EffectiveCall, InvocationBuffer};

/// Capacity in words of the bootstrap invocation buffer.
pub const BOOTSTRAP_INVOCATION_DATA_SIZE: usize = 150;

/// Kernel reply to a single invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationReply {
    /// Reply label, an seL4 error code.
    pub status: Word,
    /// First reply message registers.
    pub mrs: [Word; FAST_MESSAGE_REGISTERS],
}

impl InvocationReply {
    /// Successful reply with no payload.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: NO_ERROR,
            mrs: [0; FAST_MESSAGE_REGISTERS],
        }
    }

    /// Failed reply with `status`.
    #[must_use]
    pub const fn error(status: Word) -> Self {
        Self {
            status,
            mrs: [0; FAST_MESSAGE_REGISTERS],
        }
    }
}

/// Issues privileged kernel invocations.
pub trait Invoke {
    /// Perform `call` and return the kernel's reply.
    fn invoke(&mut self, call: &EffectiveCall) -> InvocationReply;
}

/// The two replay passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Maps the system invocation data into the monitor.
    Bootstrap,
    /// Creates and configures every other kernel object.
    System,
}

impl Pass {
    /// Lower-case pass name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Counters reported after a successful pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records decoded.
    pub records: usize,
    /// Kernel calls issued.
    pub calls: u64,
}

/// Replay every record in `buffer` through `kernel`.
pub fn replay<K: Invoke + ?Sized>(
    kernel: &mut K,
    pass: Pass,
    buffer: &InvocationBuffer<'_>,
) -> Result<ReplayStats, MonitorError> {
    log::info!("Number of {pass} invocations: {:#x}", buffer.count());
    let mut stats = ReplayStats::default();
    for (record_index, decoded) in buffer.records().enumerate() {
        let record = decoded.map_err(|reason| MonitorError::MalformedInvocation {
            pass,
            record: record_index,
            reason,
        })?;
        for iteration in 0..record.iterations() {
            let call = record.call(iteration);
            log::trace!(
                "{pass} invocation {record_index}.{iteration}: service={:#x} label={:#x} caps={:x?} mrs={:x?}",
                call.service,
                call.tag.label(),
                call.caps(),
                call.mrs()
            );
            let reply = kernel.invoke(&call);
            stats.calls += 1;
            if reply.status != NO_ERROR {
                return Err(MonitorError::InvocationFailed {
                    pass,
                    record: record_index,
                    iteration,
                    status: reply.status,
                });
            }
        }
        stats.records += 1;
    }
    log::info!("completed {pass} invocations");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{Invocation, Repeat, RecordEncoder};

    #[derive(Default)]
    struct Recorder {
        calls: std::vec::Vec<EffectiveCall>,
        fail_at: Option<(usize, Word)>,
    }

    impl Invoke for Recorder {
        fn invoke(&mut self, call: &EffectiveCall) -> InvocationReply {
            self.calls.push(*call);
            match self.fail_at {
                Some((index, status)) if index + 1 == self.calls.len() => {
                    InvocationReply::error(status)
                }
                _ => InvocationReply::ok(),
            }
        }
    }

    fn sample() -> RecordEncoder<64> {
        let mut enc = RecordEncoder::new();
        enc.push(Invocation {
            service: 1,
            label: 10,
            caps: &[],
            mrs: &[1],
        })
        .expect("record 0");
        enc.push_repeated(
            Invocation {
                service: 2,
                label: 11,
                caps: &[5],
                mrs: &[],
            },
            Repeat {
                count: 3,
                service: 0,
                caps: &[1],
                mrs: &[],
            },
        )
        .expect("record 1");
        enc.push(Invocation {
            service: 3,
            label: 12,
            caps: &[],
            mrs: &[],
        })
        .expect("record 2");
        enc
    }

    #[test]
    fn replays_all_iterations_in_order() {
        let enc = sample();
        let mut kernel = Recorder::default();
        let stats = replay(&mut kernel, Pass::System, &enc.buffer()).expect("replay");
        assert_eq!(stats, ReplayStats { records: 3, calls: 5 });
        let caps: std::vec::Vec<_> = kernel.calls[1..4].iter().map(|c| c.caps()[0]).collect();
        assert_eq!(caps, [5, 6, 7]);
        assert_eq!(kernel.calls[4].service, 3);
    }

    #[test]
    fn failure_stops_the_pass() {
        let enc = sample();
        let mut kernel = Recorder {
            fail_at: Some((2, 6)),
            ..Recorder::default()
        };
        let err = replay(&mut kernel, Pass::Bootstrap, &enc.buffer()).unwrap_err();
        assert_eq!(
            err,
            MonitorError::InvocationFailed {
                pass: Pass::Bootstrap,
                record: 1,
                iteration: 1,
                status: 6,
            }
        );
        assert_eq!(kernel.calls.len(), 3);
    }

    #[test]
    fn malformed_record_is_reported_with_index() {
        let enc = sample();
        let buffer = InvocationBuffer::new(enc.words(), 4);
        let mut kernel = Recorder::default();
        let err = replay(&mut kernel, Pass::System, &buffer).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::MalformedInvocation { record: 3, .. }
        ));
        assert_eq!(kernel.calls.len(), 5);
    }
}
