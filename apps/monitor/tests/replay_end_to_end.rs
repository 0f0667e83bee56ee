// Author: Lukas Bower
#![cfg(feature = "std")]

use monitor::abi::{CPtr, Word};
use monitor::boot::bootstrap;
use monitor::config::MonitorConfig;
use monitor::host::SimKernel;
use monitor::invocation::{Invocation, RecordEncoder, Repeat};
use monitor::registry::{name_from_bytes, Component, VirtualMachine};
use monitor::replay::{Pass, BOOTSTRAP_INVOCATION_DATA_SIZE};
use monitor::untyped::{UntypedInfo, UntypedMismatch, UntypedRegion};
use monitor::MonitorError;

const REGIONS: [UntypedRegion; 2] = [
    UntypedRegion::new(0x4000_0000, 20, false),
    UntypedRegion::new(0x0900_0000, 12, true),
];

fn untypeds(regions: &[UntypedRegion]) -> UntypedInfo<'_> {
    UntypedInfo {
        cap_start: 0x40,
        cap_end: 0x40 + regions.len() as CPtr,
        regions,
    }
}

fn config() -> MonitorConfig {
    let mut config = MonitorConfig::new(0x10, 0x11).with_thread_names(true);
    config
        .registry
        .register(
            1,
            Component {
                name: name_from_bytes(b"timer"),
                tcb: 0x101,
                stack_base: 0x0100_0000,
                sched_context: 0x201,
                notification: 0x301,
            },
        )
        .expect("register timer");
    config
        .registry
        .register_vm(VirtualMachine {
            name: name_from_bytes(b"guest"),
            tcb: 0x401,
        })
        .expect("register vm");
    config
}

fn bootstrap_records() -> RecordEncoder<BOOTSTRAP_INVOCATION_DATA_SIZE> {
    let mut records = RecordEncoder::new();
    records
        .push(Invocation {
            service: 0x2,
            label: 1,
            caps: &[0x3],
            mrs: &[8, 0x1000],
        })
        .expect("bootstrap record");
    records
}

fn system_records() -> RecordEncoder<64> {
    let mut records = RecordEncoder::new();
    records
        .push(Invocation {
            service: 0x20,
            label: 1,
            caps: &[0x3],
            mrs: &[2, 12],
        })
        .expect("record 0");
    records
        .push_repeated(
            Invocation {
                service: 0x40,
                label: 9,
                caps: &[0x101],
                mrs: &[0x1000, 7],
            },
            Repeat {
                count: 2,
                service: 1,
                caps: &[1],
                mrs: &[0x1000, 0],
            },
        )
        .expect("record 1");
    records
        .push(Invocation {
            service: 0x101,
            label: 5,
            caps: &[],
            mrs: &[],
        })
        .expect("record 2");
    records
}

#[test]
fn bootstrap_then_system_in_program_order() {
    let config = config();
    let boot_data = bootstrap_records();
    let system_data = system_records();
    let mut kernel = SimKernel::new();

    let summary = bootstrap(
        &mut kernel,
        &config,
        &untypeds(&REGIONS),
        &untypeds(&REGIONS),
        &boot_data.buffer(),
        || system_data.buffer(),
    )
    .expect("boot");

    assert_eq!(summary.bootstrap.records, 1);
    assert_eq!(summary.system.records, 3);
    assert_eq!(summary.bootstrap.calls + summary.system.calls, 5);

    let calls = kernel.calls();
    let shape: Vec<(CPtr, Word, Vec<CPtr>, Vec<Word>)> = calls
        .iter()
        .map(|call| {
            (
                call.service,
                call.tag.label(),
                call.caps().to_vec(),
                call.mrs().to_vec(),
            )
        })
        .collect();
    let expected: Vec<(CPtr, Word, Vec<CPtr>, Vec<Word>)> = vec![
        (0x2, 1, vec![0x3], vec![8, 0x1000]),
        (0x20, 1, vec![0x3], vec![2, 12]),
        (0x40, 9, vec![0x101], vec![0x1000, 7]),
        (0x41, 9, vec![0x102], vec![0x2000, 7]),
        (0x101, 5, vec![], vec![]),
    ];
    assert_eq!(shape, expected);

    let named: Vec<(CPtr, &str)> = kernel
        .named_threads()
        .iter()
        .map(|(tcb, name)| (*tcb, name.as_str()))
        .collect();
    assert_eq!(named, [(0x101, "timer"), (0x401, "guest")]);
    assert_eq!(summary.named_threads, 2);
}

#[test]
fn failing_call_stops_the_pass() {
    let config = config();
    let boot_data = bootstrap_records();
    let system_data = system_records();
    let mut kernel = SimKernel::new();
    // Call 3 overall is iteration 1 of system record 1.
    kernel.fail_at(3, 3);

    let err = bootstrap(
        &mut kernel,
        &config,
        &untypeds(&REGIONS),
        &untypeds(&REGIONS),
        &boot_data.buffer(),
        || system_data.buffer(),
    )
    .expect_err("invocation failure");

    assert_eq!(
        err,
        MonitorError::InvocationFailed {
            pass: Pass::System,
            record: 1,
            iteration: 1,
            status: 3,
        }
    );
    assert_eq!(kernel.calls().len(), 4);
    assert_eq!(kernel.calls().last().map(|call| call.service), Some(0x41));
    assert!(kernel.named_threads().is_empty());
}

#[test]
fn untyped_mismatch_halts_before_any_invocation() {
    let config = config();
    let boot_data = bootstrap_records();
    let mut reported = REGIONS;
    reported[1].is_device = 0;
    let mut kernel = SimKernel::new();
    let mut system_evaluated = false;

    let err = bootstrap(
        &mut kernel,
        &config,
        &untypeds(&REGIONS),
        &untypeds(&reported),
        &boot_data.buffer(),
        || {
            system_evaluated = true;
            monitor::invocation::InvocationBuffer::empty()
        },
    )
    .expect_err("mismatch");

    assert_eq!(
        err,
        MonitorError::UntypedMismatch(UntypedMismatch::IsDevice {
            index: 1,
            expected: 1,
            boot: 0,
        })
    );
    assert!(kernel.calls().is_empty());
    assert!(!system_evaluated);
}

#[test]
fn names_are_skipped_when_disabled() {
    let config = config().with_thread_names(false);
    let boot_data = bootstrap_records();
    let system_data = system_records();
    let mut kernel = SimKernel::new();

    let summary = bootstrap(
        &mut kernel,
        &config,
        &untypeds(&REGIONS),
        &untypeds(&REGIONS),
        &boot_data.buffer(),
        || system_data.buffer(),
    )
    .expect("boot");

    assert_eq!(summary.named_threads, 0);
    assert!(kernel.named_threads().is_empty());
}

#[test]
fn unsized_system_data_is_rejected_before_replay() {
    let config = config();
    let boot_data = bootstrap_records();
    let mut kernel = SimKernel::new();

    let err = bootstrap(
        &mut kernel,
        &config,
        &untypeds(&REGIONS),
        &untypeds(&REGIONS),
        &boot_data.buffer(),
        || monitor::invocation::InvocationBuffer::new(&[], 3),
    )
    .expect_err("empty system data");

    assert_eq!(err, MonitorError::SystemDataEmpty { records: 3 });
    assert_eq!(kernel.calls().len(), 1);
    assert!(kernel.named_threads().is_empty());
}
