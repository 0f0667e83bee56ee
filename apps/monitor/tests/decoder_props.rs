// Author: Lukas Bower

use monitor::abi::Word;
use monitor::fault::{stack_overflow_suspected, STACK_GUARD_BYTES};
use monitor::invocation::{encoded_len, Invocation, InvocationRecord, RecordEncoder, Repeat};
use monitor::untyped::{check, UntypedInfo, UntypedMismatch, UntypedRegion};
use proptest::prelude::*;

fn args() -> impl Strategy<Value = (Vec<Word>, Vec<Word>, Vec<Word>, Vec<Word>)> {
    (0usize..=3, 0usize..=8).prop_flat_map(|(caps, mrs)| {
        (
            prop::collection::vec(any::<Word>(), caps),
            prop::collection::vec(any::<Word>(), caps),
            prop::collection::vec(any::<Word>(), mrs),
            prop::collection::vec(any::<Word>(), mrs),
        )
    })
}

fn table(regions: &[UntypedRegion]) -> UntypedInfo<'_> {
    UntypedInfo {
        cap_start: 8,
        cap_end: 8 + regions.len() as Word,
        regions,
    }
}

proptest! {
    #[test]
    fn repeated_record_yields_base_plus_scaled_increment(
        (caps, cap_steps, mrs, mr_steps) in args(),
        service in any::<Word>(),
        service_step in any::<Word>(),
        label in 0u64..0x1000,
        count in 2u32..16,
    ) {
        let mut encoder = RecordEncoder::<512>::new();
        encoder
            .push_repeated(
                Invocation { service, label, caps: &caps, mrs: &mrs },
                Repeat { count, service: service_step, caps: &cap_steps, mrs: &mr_steps },
            )
            .expect("record fits");

        let record = InvocationRecord::decode(encoder.words(), 0).expect("decode");
        prop_assert_eq!(record.iterations(), u64::from(count));
        prop_assert_eq!(record.next_offset(), encoder.words().len());
        prop_assert_eq!(record.next_offset(), 3 + 2 * caps.len() + 2 * mrs.len());

        for index in 0..u64::from(count) {
            let call = record.call(index);
            let scaled = |base: Word, step: Word| base.wrapping_add(step.wrapping_mul(index));
            prop_assert_eq!(call.service, scaled(service, service_step));
            prop_assert_eq!(call.tag.label(), label);
            let expected_caps: Vec<Word> =
                caps.iter().zip(&cap_steps).map(|(b, s)| scaled(*b, *s)).collect();
            let expected_mrs: Vec<Word> =
                mrs.iter().zip(&mr_steps).map(|(b, s)| scaled(*b, *s)).collect();
            prop_assert_eq!(call.caps(), expected_caps.as_slice());
            prop_assert_eq!(call.mrs(), expected_mrs.as_slice());
        }
    }

    #[test]
    fn single_record_advances_by_its_length(
        (caps, _, mrs, _) in args(),
        service in any::<Word>(),
        trailing in prop::collection::vec(any::<Word>(), 0..4),
    ) {
        let mut encoder = RecordEncoder::<512>::new();
        encoder
            .push(Invocation { service, label: 1, caps: &caps, mrs: &mrs })
            .expect("record fits");
        let mut words = encoder.words().to_vec();
        words.extend(trailing);

        let record = InvocationRecord::decode(&words, 0).expect("decode");
        prop_assert_eq!(record.iterations(), 1);
        prop_assert_eq!(record.next_offset(), 2 + caps.len() + mrs.len());
        prop_assert_eq!(record.next_offset(), encoded_len(caps.len(), mrs.len(), 1));
    }

    #[test]
    fn single_region_difference_is_located(
        regions in prop::collection::vec((any::<Word>(), 12u64..48, any::<bool>()), 1..32),
        pick in any::<prop::sample::Index>(),
        field in 0u8..3,
    ) {
        let expected: Vec<UntypedRegion> = regions
            .iter()
            .map(|(paddr, bits, device)| UntypedRegion::new(*paddr, *bits, *device))
            .collect();
        let index = pick.index(expected.len());
        let mut reported = expected.clone();
        match field {
            0 => reported[index].paddr ^= 0x1000,
            1 => reported[index].size_bits += 1,
            _ => reported[index].is_device ^= 1,
        }

        prop_assert_eq!(check(&table(&expected), &table(&expected)), Ok(()));
        let mismatch = check(&table(&expected), &table(&reported)).expect_err("differs");
        let located = match mismatch {
            UntypedMismatch::Paddr { index, .. }
            | UntypedMismatch::SizeBits { index, .. }
            | UntypedMismatch::IsDevice { index, .. } => index,
            other => return Err(TestCaseError::fail(format!("unexpected {other:?}"))),
        };
        prop_assert_eq!(located, index);
    }

    #[test]
    fn stack_heuristic_is_one_page_wide(base in 2 * STACK_GUARD_BYTES..Word::MAX, offset in 1u64..=0x2000) {
        let addr = base.saturating_sub(offset);
        prop_assert_eq!(stack_overflow_suspected(addr, base), offset <= STACK_GUARD_BYTES);
    }
}

#[test]
fn stack_heuristic_boundaries() {
    let base = 0x0100_0000;
    assert!(stack_overflow_suspected(base - 1, base));
    assert!(stack_overflow_suspected(base - STACK_GUARD_BYTES, base));
    assert!(!stack_overflow_suspected(base - STACK_GUARD_BYTES - 1, base));
    assert!(!stack_overflow_suspected(base, base));
    assert!(!stack_overflow_suspected(0, 0x10));
}
