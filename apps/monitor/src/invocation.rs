// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode (and, for the host, encode) packed capability invocation records.
// Author: Lukas Bower

//! Packed invocation records produced by the system build tool.
//!
//! A record starts with a header word whose low 32 bits hold the seL4
//! message-info tag and whose high 32 bits hold `iterations - 1`. It is
//! followed by the target capability, the extra capabilities, the message
//! registers and, for repeated records, one increment word for each of those.
//! Iteration `i` of a repeated record uses `base + increment * i` with
//! wrapping word arithmetic.

use core::fmt;

use heapless::Vec as HeaplessVec;

use crate::abi::{CPtr, MessageInfo, Word, MSG_MAX_EXTRA_CAPS, MSG_MAX_LENGTH};

const TAG_MASK: Word = 0xffff_ffff;
const ITERATION_SHIFT: u32 = 32;

/// Reasons a record cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The record runs past the end of the word buffer.
    #[error("record at word {offset} needs {needed} words but only {available} remain")]
    Truncated {
        /// Word offset of the record header.
        offset: usize,
        /// Words the record claims to occupy.
        needed: usize,
        /// Words left in the buffer from `offset`.
        available: usize,
    },
    /// The tag asks the kernel to unwrap capabilities, which replay never does.
    #[error("record at word {offset} has caps_unwrapped={caps_unwrapped:#x}")]
    UnwrappedCaps {
        /// Word offset of the record header.
        offset: usize,
        /// Offending mask from the tag.
        caps_unwrapped: Word,
    },
    /// The tag declares more message registers than an IPC buffer holds.
    #[error("record at word {offset} declares {length} message registers")]
    MessageTooLong {
        /// Word offset of the record header.
        offset: usize,
        /// Declared message length.
        length: Word,
    },
}

#[derive(Debug, Clone, Copy)]
struct Increments<'a> {
    target: Word,
    caps: &'a [Word],
    mrs: &'a [Word],
}

/// Borrowed view of one decoded record.
#[derive(Debug, Clone, Copy)]
pub struct InvocationRecord<'a> {
    offset: usize,
    tag: MessageInfo,
    iterations: u64,
    target: CPtr,
    caps: &'a [CPtr],
    mrs: &'a [Word],
    increments: Option<Increments<'a>>,
}

impl<'a> InvocationRecord<'a> {
    /// Decode the record whose header sits at `words[offset]`.
    pub fn decode(words: &'a [Word], offset: usize) -> Result<Self, DecodeError> {
        let available = words.len().saturating_sub(offset);
        let header = *words.get(offset).ok_or(DecodeError::Truncated {
            offset,
            needed: 1,
            available,
        })?;

        let tag = MessageInfo::from_word(header & TAG_MASK);
        let iterations = (header >> ITERATION_SHIFT) + 1;
        if tag.caps_unwrapped() != 0 {
            return Err(DecodeError::UnwrappedCaps {
                offset,
                caps_unwrapped: tag.caps_unwrapped(),
            });
        }
        if tag.length() as usize > MSG_MAX_LENGTH {
            return Err(DecodeError::MessageTooLong {
                offset,
                length: tag.length(),
            });
        }

        let cap_count = tag.extra_caps() as usize;
        let mr_count = tag.length() as usize;
        let needed = encoded_len(cap_count, mr_count, iterations);
        if needed > available {
            return Err(DecodeError::Truncated {
                offset,
                needed,
                available,
            });
        }

        let body = &words[offset + 1..offset + needed];
        let (target, body) = (body[0], &body[1..]);
        let (caps, body) = body.split_at(cap_count);
        let (mrs, body) = body.split_at(mr_count);
        let increments = if iterations > 1 {
            let (target, body) = (body[0], &body[1..]);
            let (caps, mrs) = body.split_at(cap_count);
            Some(Increments { target, caps, mrs })
        } else {
            None
        };

        Ok(Self {
            offset,
            tag,
            iterations,
            target,
            caps,
            mrs,
            increments,
        })
    }

    /// Message-info tag shared by every iteration.
    #[must_use]
    pub fn tag(&self) -> MessageInfo {
        self.tag
    }

    /// Number of times the record is issued (at least one).
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Word offset of the record that follows this one.
    #[must_use]
    pub fn next_offset(&self) -> usize {
        self.offset + encoded_len(self.caps.len(), self.mrs.len(), self.iterations)
    }

    /// Effective arguments for iteration `index`.
    #[must_use]
    pub fn call(&self, index: u64) -> EffectiveCall {
        let mut call = EffectiveCall {
            service: self.target,
            tag: self.tag,
            caps: [0; MSG_MAX_EXTRA_CAPS],
            cap_count: self.caps.len(),
            mrs: [0; MSG_MAX_LENGTH],
            mr_count: self.mrs.len(),
        };
        call.caps[..self.caps.len()].copy_from_slice(self.caps);
        call.mrs[..self.mrs.len()].copy_from_slice(self.mrs);

        if let Some(inc) = self.increments.as_ref().filter(|_| index > 0) {
            call.service = advance(call.service, inc.target, index);
            for (slot, step) in call.caps.iter_mut().zip(inc.caps) {
                *slot = advance(*slot, *step, index);
            }
            for (slot, step) in call.mrs.iter_mut().zip(inc.mrs) {
                *slot = advance(*slot, *step, index);
            }
        }
        call
    }
}

fn advance(base: Word, step: Word, index: u64) -> Word {
    base.wrapping_add(step.wrapping_mul(index))
}

/// Length in words of a record with the given shape.
#[must_use]
pub const fn encoded_len(cap_count: usize, mr_count: usize, iterations: u64) -> usize {
    if iterations > 1 {
        3 + 2 * cap_count + 2 * mr_count
    } else {
        2 + cap_count + mr_count
    }
}

/// Fully resolved arguments of a single kernel invocation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EffectiveCall {
    /// Invoked capability.
    pub service: CPtr,
    /// Message-info tag passed to the kernel.
    pub tag: MessageInfo,
    caps: [CPtr; MSG_MAX_EXTRA_CAPS],
    cap_count: usize,
    mrs: [Word; MSG_MAX_LENGTH],
    mr_count: usize,
}

impl EffectiveCall {
    /// Extra capabilities placed in the IPC buffer.
    #[must_use]
    pub fn caps(&self) -> &[CPtr] {
        &self.caps[..self.cap_count]
    }

    /// Message registers of the invocation.
    #[must_use]
    pub fn mrs(&self) -> &[Word] {
        &self.mrs[..self.mr_count]
    }
}

impl fmt::Debug for EffectiveCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveCall")
            .field("service", &self.service)
            .field("label", &self.tag.label())
            .field("caps", &self.caps())
            .field("mrs", &self.mrs())
            .finish()
    }
}

/// A packed word buffer together with the number of records it holds.
#[derive(Debug, Clone, Copy)]
pub struct InvocationBuffer<'a> {
    words: &'a [Word],
    count: usize,
}

impl<'a> InvocationBuffer<'a> {
    /// Wrap `count` records packed into `words`.
    #[must_use]
    pub const fn new(words: &'a [Word], count: usize) -> Self {
        Self { words, count }
    }

    /// A buffer with no records.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            words: &[],
            count: 0,
        }
    }

    /// Number of records declared for the buffer.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Raw packed words.
    #[must_use]
    pub fn words(&self) -> &'a [Word] {
        self.words
    }

    /// Decode the declared records in order. Iteration stops after the first error.
    #[must_use]
    pub fn records(&self) -> Records<'a> {
        Records {
            words: self.words,
            offset: 0,
            remaining: self.count,
        }
    }
}

/// Iterator over the records of an [`InvocationBuffer`].
#[derive(Debug)]
pub struct Records<'a> {
    words: &'a [Word],
    offset: usize,
    remaining: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<InvocationRecord<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match InvocationRecord::decode(self.words, self.offset) {
            Ok(record) => {
                self.remaining -= 1;
                self.offset = record.next_offset();
                Some(Ok(record))
            }
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }
}

/// Arguments of one record handed to [`RecordEncoder`].
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Invoked capability.
    pub service: CPtr,
    /// Invocation label.
    pub label: Word,
    /// Extra capabilities.
    pub caps: &'a [CPtr],
    /// Message registers.
    pub mrs: &'a [Word],
}

/// Per-iteration increments of a repeated record.
#[derive(Debug, Clone, Copy)]
pub struct Repeat<'a> {
    /// Number of iterations, at least two.
    pub count: u32,
    /// Increment of the invoked capability.
    pub service: Word,
    /// Increments of the extra capabilities.
    pub caps: &'a [Word],
    /// Increments of the message registers.
    pub mrs: &'a [Word],
}

/// Reasons a record cannot be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// More than three extra capabilities.
    #[error("{0} extra capabilities exceed the kernel limit")]
    TooManyCaps(usize),
    /// More message registers than the IPC buffer carries.
    #[error("{0} message registers exceed the kernel limit")]
    TooManyMrs(usize),
    /// Increment slices must match the base argument lengths.
    #[error("increment shape does not match the invocation arguments")]
    IncrementShape,
    /// Repeated records need at least two iterations.
    #[error("repeat count {0} is below two")]
    RepeatCount(u32),
    /// The output buffer is full.
    #[error("invocation buffer is full")]
    Full,
}

/// Writes records in the packed format into a fixed-capacity buffer.
#[derive(Debug, Default)]
pub struct RecordEncoder<const N: usize> {
    words: HeaplessVec<Word, N>,
    count: usize,
}

impl<const N: usize> RecordEncoder<N> {
    /// Create an empty encoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: HeaplessVec::new(),
            count: 0,
        }
    }

    /// Append a record issued once. Returns its word offset.
    pub fn push(&mut self, invocation: Invocation<'_>) -> Result<usize, EncodeError> {
        self.encode(invocation, None)
    }

    /// Append a record issued `repeat.count` times. Returns its word offset.
    pub fn push_repeated(
        &mut self,
        invocation: Invocation<'_>,
        repeat: Repeat<'_>,
    ) -> Result<usize, EncodeError> {
        if repeat.count < 2 {
            return Err(EncodeError::RepeatCount(repeat.count));
        }
        if repeat.caps.len() != invocation.caps.len() || repeat.mrs.len() != invocation.mrs.len() {
            return Err(EncodeError::IncrementShape);
        }
        self.encode(invocation, Some(repeat))
    }

    fn encode(
        &mut self,
        invocation: Invocation<'_>,
        repeat: Option<Repeat<'_>>,
    ) -> Result<usize, EncodeError> {
        if invocation.caps.len() > MSG_MAX_EXTRA_CAPS {
            return Err(EncodeError::TooManyCaps(invocation.caps.len()));
        }
        if invocation.mrs.len() > MSG_MAX_LENGTH {
            return Err(EncodeError::TooManyMrs(invocation.mrs.len()));
        }
        let iterations = repeat.map_or(1, |r| u64::from(r.count));
        let needed = encoded_len(invocation.caps.len(), invocation.mrs.len(), iterations);
        if self.words.len() + needed > N {
            return Err(EncodeError::Full);
        }

        let offset = self.words.len();
        let tag = MessageInfo::new(
            invocation.label,
            0,
            invocation.caps.len() as Word,
            invocation.mrs.len() as Word,
        );
        let header = ((iterations - 1) << ITERATION_SHIFT) | (tag.word() & TAG_MASK);
        self.put(header)?;
        self.put(invocation.service)?;
        self.put_all(invocation.caps)?;
        self.put_all(invocation.mrs)?;
        if let Some(repeat) = repeat {
            self.put(repeat.service)?;
            self.put_all(repeat.caps)?;
            self.put_all(repeat.mrs)?;
        }
        self.count += 1;
        Ok(offset)
    }

    fn put(&mut self, word: Word) -> Result<(), EncodeError> {
        self.words.push(word).map_err(|_| EncodeError::Full)
    }

    fn put_all(&mut self, words: &[Word]) -> Result<(), EncodeError> {
        self.words
            .extend_from_slice(words)
            .map_err(|_| EncodeError::Full)
    }

    /// Records written so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Packed words written so far.
    #[must_use]
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// View the encoded records as a replayable buffer.
    #[must_use]
    pub fn buffer(&self) -> InvocationBuffer<'_> {
        InvocationBuffer::new(&self.words, self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record_layout() {
        let mut enc = RecordEncoder::<16>::new();
        enc.push(Invocation {
            service: 7,
            label: 3,
            caps: &[10, 11],
            mrs: &[1, 2, 3],
        })
        .expect("encode");
        assert_eq!(enc.words().len(), 2 + 2 + 3);

        let record = InvocationRecord::decode(enc.words(), 0).expect("decode");
        assert_eq!(record.iterations(), 1);
        assert_eq!(record.next_offset(), 7);
        let call = record.call(0);
        assert_eq!(call.service, 7);
        assert_eq!(call.tag.label(), 3);
        assert_eq!(call.caps(), &[10, 11]);
        assert_eq!(call.mrs(), &[1, 2, 3]);
    }

    #[test]
    fn repeated_record_applies_increments() {
        let mut enc = RecordEncoder::<32>::new();
        enc.push_repeated(
            Invocation {
                service: 100,
                label: 9,
                caps: &[20],
                mrs: &[0x1000, 5],
            },
            Repeat {
                count: 4,
                service: 1,
                caps: &[2],
                mrs: &[0x1000, 0],
            },
        )
        .expect("encode");
        let record = InvocationRecord::decode(enc.words(), 0).expect("decode");
        assert_eq!(record.iterations(), 4);
        assert_eq!(record.next_offset(), 3 + 2 + 4);

        let third = record.call(2);
        assert_eq!(third.service, 102);
        assert_eq!(third.caps(), &[24]);
        assert_eq!(third.mrs(), &[0x3000, 5]);
    }

    #[test]
    fn increments_wrap_around_the_word() {
        let words = [
            (1 << ITERATION_SHIFT) | MessageInfo::new(1, 0, 0, 1).word(),
            Word::MAX,
            Word::MAX - 1,
            1,
            2,
        ];
        let record = InvocationRecord::decode(&words, 0).expect("decode");
        let call = record.call(1);
        assert_eq!(call.service, 0);
        assert_eq!(call.mrs(), &[0]);
    }

    #[test]
    fn unwrapped_caps_are_rejected() {
        let words = [MessageInfo::new(1, 0b010, 0, 0).word(), 4];
        assert_eq!(
            InvocationRecord::decode(&words, 0).unwrap_err(),
            DecodeError::UnwrappedCaps {
                offset: 0,
                caps_unwrapped: 0b010,
            }
        );
    }

    #[test]
    fn overlong_message_is_rejected() {
        let words = [MessageInfo::new(1, 0, 0, 121).word()];
        assert!(matches!(
            InvocationRecord::decode(&words, 0),
            Err(DecodeError::MessageTooLong { length: 121, .. })
        ));
    }

    #[test]
    fn truncated_record_is_rejected() {
        let words = [MessageInfo::new(1, 0, 1, 2).word(), 4, 5];
        assert_eq!(
            InvocationRecord::decode(&words, 0).unwrap_err(),
            DecodeError::Truncated {
                offset: 0,
                needed: 5,
                available: 3,
            }
        );
        assert!(matches!(
            InvocationRecord::decode(&words, 3),
            Err(DecodeError::Truncated { needed: 1, available: 0, .. })
        ));
    }

    #[test]
    fn records_iterator_stops_after_error() {
        let mut enc = RecordEncoder::<8>::new();
        enc.push(Invocation {
            service: 1,
            label: 1,
            caps: &[],
            mrs: &[],
        })
        .expect("encode");
        let buffer = InvocationBuffer::new(enc.words(), 3);
        let results: std::vec::Vec<_> = buffer.records().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn encoder_rejects_bad_shapes() {
        let mut enc = RecordEncoder::<4>::new();
        let invocation = Invocation {
            service: 1,
            label: 1,
            caps: &[1, 2, 3, 4],
            mrs: &[],
        };
        assert_eq!(enc.push(invocation), Err(EncodeError::TooManyCaps(4)));
        let invocation = Invocation {
            caps: &[1],
            ..invocation
        };
        let repeat = Repeat {
            count: 2,
            service: 0,
            caps: &[],
            mrs: &[],
        };
        assert_eq!(
            enc.push_repeated(invocation, repeat),
            Err(EncodeError::IncrementShape)
        );
        assert_eq!(
            enc.push_repeated(invocation, Repeat { count: 1, ..repeat }),
            Err(EncodeError::RepeatCount(1))
        );
        let big = Invocation {
            mrs: &[0; 8],
            ..invocation
        };
        assert_eq!(enc.push(big), Err(EncodeError::Full));
        assert!(enc.words().is_empty());
    }
}
