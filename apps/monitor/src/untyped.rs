// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate the build-time untyped layout against the kernel boot info.
// Author: Lukas Bower

//! Untyped memory validation.
//!
//! The build tool plans every object allocation against the untyped list it
//! expects the kernel to hand over. Replay is only sound when the boot info
//! reports exactly that list.

use core::fmt;

use static_assertions::const_assert_eq;

use crate::abi::{CPtr, Word};

/// Upper bound of untyped descriptors the build tool emits.
pub const MAX_UNTYPED_REGIONS: usize = 256;

/// One untyped region in the build tool's layout (native-word fields).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UntypedRegion {
    /// Physical base address.
    pub paddr: Word,
    /// Region size as a power of two.
    pub size_bits: Word,
    /// Non-zero for device memory.
    pub is_device: Word,
}

// The build tool writes three native words per region.
const_assert_eq!(core::mem::size_of::<UntypedRegion>(), 3 * core::mem::size_of::<Word>());

impl UntypedRegion {
    /// Build a region.
    #[must_use]
    pub const fn new(paddr: Word, size_bits: Word, is_device: bool) -> Self {
        Self {
            paddr,
            size_bits,
            is_device: is_device as Word,
        }
    }
}

/// Untyped table embedded in the monitor image by the build tool.
#[derive(Debug, Clone, Copy)]
pub struct UntypedInfo<'a> {
    /// First untyped capability slot.
    pub cap_start: CPtr,
    /// One past the last untyped capability slot.
    pub cap_end: CPtr,
    /// Regions in capability order.
    pub regions: &'a [UntypedRegion],
}

/// Untyped table as reported by the kernel, already widened to native words.
pub type BootUntypeds<'a> = UntypedInfo<'a>;

/// First difference between the expected and the boot-reported tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UntypedMismatch {
    /// Untyped capability ranges start at different slots.
    #[error("cap start mismatch. Expected cap start: {expected:#x}  boot info cap start: {boot:#x}")]
    CapStart {
        /// Build-time value.
        expected: CPtr,
        /// Boot info value.
        boot: CPtr,
    },
    /// Untyped capability ranges end at different slots.
    #[error("cap end mismatch. Expected cap end: {expected:#x}  boot info cap end: {boot:#x}")]
    CapEnd {
        /// Build-time value.
        expected: CPtr,
        /// Boot info value.
        boot: CPtr,
    },
    /// Physical addresses differ.
    #[error("paddr mismatch for untyped region: {index}  expected paddr: {expected:#x}  boot info paddr: {boot:#x}")]
    Paddr {
        /// Index within the range.
        index: usize,
        /// Build-time value.
        expected: Word,
        /// Boot info value.
        boot: Word,
    },
    /// Sizes differ.
    #[error("size_bits mismatch for untyped region: {index}  expected size_bits: {expected}  boot info size_bits: {boot}")]
    SizeBits {
        /// Index within the range.
        index: usize,
        /// Build-time value.
        expected: Word,
        /// Boot info value.
        boot: Word,
    },
    /// Device classes differ.
    #[error("is_device mismatch for untyped region: {index}  expected is_device: {expected}  boot info is_device: {boot}")]
    IsDevice {
        /// Index within the range.
        index: usize,
        /// Build-time value.
        expected: Word,
        /// Boot info value.
        boot: Word,
    },
    /// One of the tables is shorter than the declared capability range.
    #[error("untyped region {index} is missing from the {table} table")]
    Missing {
        /// Index within the range.
        index: usize,
        /// Which table ran short.
        table: Table,
    },
}

/// Identifies one of the two compared tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// Build-time table.
    Expected,
    /// Kernel boot info table.
    BootInfo,
}

impl Table {
    /// Human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Expected => "expected",
            Self::BootInfo => "boot info",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Compare the build-time table with the boot info table.
pub fn check(expected: &UntypedInfo<'_>, boot: &BootUntypeds<'_>) -> Result<(), UntypedMismatch> {
    if expected.cap_start != boot.cap_start {
        return Err(UntypedMismatch::CapStart {
            expected: expected.cap_start,
            boot: boot.cap_start,
        });
    }
    if expected.cap_end != boot.cap_end {
        return Err(UntypedMismatch::CapEnd {
            expected: expected.cap_end,
            boot: boot.cap_end,
        });
    }

    let count = expected.cap_end.saturating_sub(expected.cap_start) as usize;
    for index in 0..count {
        let ours = expected.regions.get(index).ok_or(UntypedMismatch::Missing {
            index,
            table: Table::Expected,
        })?;
        let theirs = boot.regions.get(index).ok_or(UntypedMismatch::Missing {
            index,
            table: Table::BootInfo,
        })?;
        if ours.paddr != theirs.paddr {
            return Err(UntypedMismatch::Paddr {
                index,
                expected: ours.paddr,
                boot: theirs.paddr,
            });
        }
        if ours.size_bits != theirs.size_bits {
            return Err(UntypedMismatch::SizeBits {
                index,
                expected: ours.size_bits,
                boot: theirs.size_bits,
            });
        }
        if ours.is_device != theirs.is_device {
            return Err(UntypedMismatch::IsDevice {
                index,
                expected: ours.is_device,
                boot: theirs.is_device,
            });
        }
    }
    Ok(())
}

/// Contiguous physical range of a single device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    /// Inclusive start.
    pub start: Word,
    /// Exclusive end.
    pub end: Word,
    /// Device memory when set.
    pub is_device: bool,
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "paddr: {:#018x} - {:#018x} ({})",
            self.start,
            self.end,
            if self.is_device { "device" } else { "normal" }
        )
    }
}

fn region_end(region: &UntypedRegion) -> Word {
    u32::try_from(region.size_bits)
        .ok()
        .and_then(|bits| 1u64.checked_shl(bits))
        .and_then(|size| region.paddr.checked_add(size))
        .unwrap_or(Word::MAX)
}

/// Merge adjacent regions of the same class, in table order.
pub fn coalesce(regions: &[UntypedRegion]) -> Coalesce<'_> {
    Coalesce {
        regions,
        position: 0,
    }
}

/// Iterator returned by [`coalesce`].
#[derive(Debug)]
pub struct Coalesce<'a> {
    regions: &'a [UntypedRegion],
    position: usize,
}

impl Iterator for Coalesce<'_> {
    type Item = MemoryRange;

    fn next(&mut self) -> Option<MemoryRange> {
        let first = self.regions.get(self.position)?;
        let mut range = MemoryRange {
            start: first.paddr,
            end: region_end(first),
            is_device: first.is_device != 0,
        };
        self.position += 1;
        while let Some(region) = self.regions.get(self.position) {
            if region.paddr != range.end || (region.is_device != 0) != range.is_device {
                break;
            }
            range.end = region_end(region);
            self.position += 1;
        }
        Some(range)
    }
}

fn dump_table(title: &str, info: &UntypedInfo<'_>, emit: &mut impl FnMut(fmt::Arguments<'_>)) {
    emit(format_args!(
        "{title} untyped layout (caps {:#x}..{:#x})",
        info.cap_start, info.cap_end
    ));
    let count = info.cap_end.saturating_sub(info.cap_start) as usize;
    let regions = &info.regions[..count.min(info.regions.len())];
    for range in coalesce(regions) {
        emit(format_args!("    {range}"));
    }
}

fn dump_lines(
    expected: &UntypedInfo<'_>,
    boot: &BootUntypeds<'_>,
    emit: &mut impl FnMut(fmt::Arguments<'_>),
) {
    dump_table("expected", expected, emit);
    dump_table("boot info", boot, emit);
}

/// Log both layouts after a failed [`check`].
pub fn dump(expected: &UntypedInfo<'_>, boot: &BootUntypeds<'_>) {
    dump_lines(expected, boot, &mut |line: fmt::Arguments<'_>| log::info!("{line}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGIONS: [UntypedRegion; 3] = [
        UntypedRegion::new(0x4000_0000, 20, false),
        UntypedRegion::new(0x4010_0000, 20, false),
        UntypedRegion::new(0x0900_0000, 12, true),
    ];

    fn table(regions: &[UntypedRegion]) -> UntypedInfo<'_> {
        UntypedInfo {
            cap_start: 0x20,
            cap_end: 0x20 + regions.len() as CPtr,
            regions,
        }
    }

    #[test]
    fn identical_tables_match() {
        assert_eq!(check(&table(&REGIONS), &table(&REGIONS)), Ok(()));
    }

    #[test]
    fn single_field_difference_is_located() {
        let mut boot = REGIONS;
        boot[1].size_bits = 21;
        assert_eq!(
            check(&table(&REGIONS), &table(&boot)),
            Err(UntypedMismatch::SizeBits {
                index: 1,
                expected: 20,
                boot: 21,
            })
        );

        let mut boot = REGIONS;
        boot[2].is_device = 0;
        assert!(matches!(
            check(&table(&REGIONS), &table(&boot)),
            Err(UntypedMismatch::IsDevice { index: 2, .. })
        ));

        let mut boot = REGIONS;
        boot[0].paddr = 0;
        assert!(matches!(
            check(&table(&REGIONS), &table(&boot)),
            Err(UntypedMismatch::Paddr { index: 0, .. })
        ));
    }

    #[test]
    fn range_bounds_are_checked_before_regions() {
        let mut boot_regions = REGIONS;
        boot_regions[0].paddr = 0;
        let mut boot = table(&boot_regions);
        boot.cap_start += 1;
        assert!(matches!(
            check(&table(&REGIONS), &boot),
            Err(UntypedMismatch::CapStart { .. })
        ));

        let mut boot = table(&boot_regions);
        boot.cap_end += 1;
        assert!(matches!(
            check(&table(&REGIONS), &boot),
            Err(UntypedMismatch::CapEnd { .. })
        ));
    }

    #[test]
    fn short_table_is_reported_missing() {
        let expected = table(&REGIONS);
        let boot = UntypedInfo {
            regions: &REGIONS[..2],
            ..expected
        };
        assert_eq!(
            check(&expected, &boot),
            Err(UntypedMismatch::Missing {
                index: 2,
                table: Table::BootInfo,
            })
        );
    }

    #[test]
    fn coalesce_merges_adjacent_same_class() {
        let ranges: std::vec::Vec<_> = coalesce(&REGIONS).collect();
        assert_eq!(
            ranges,
            [
                MemoryRange {
                    start: 0x4000_0000,
                    end: 0x4020_0000,
                    is_device: false,
                },
                MemoryRange {
                    start: 0x0900_0000,
                    end: 0x0900_1000,
                    is_device: true,
                },
            ]
        );
    }

    #[test]
    fn coalesce_saturates_oversized_regions() {
        let regions = [UntypedRegion::new(0x1000, 64, false)];
        let range = coalesce(&regions).next().expect("one range");
        assert_eq!(range.end, Word::MAX);
    }

    #[test]
    fn dump_lists_full_ranges_of_both_tables() {
        let expected = table(&REGIONS);
        let boot = UntypedInfo {
            cap_start: 0x20,
            cap_end: 0x21,
            regions: &[UntypedRegion::new(0xffff_ffff_0000_0000, 16, true)],
        };
        let mut lines = std::vec::Vec::new();
        dump_lines(&expected, &boot, &mut |line: fmt::Arguments<'_>| {
            lines.push(std::format!("{line}"));
        });
        assert_eq!(
            lines,
            [
                "expected untyped layout (caps 0x20..0x23)",
                "    paddr: 0x0000000040000000 - 0x0000000040200000 (normal)",
                "    paddr: 0x0000000009000000 - 0x0000000009001000 (device)",
                "boot info untyped layout (caps 0x20..0x21)",
                "    paddr: 0xffffffff00000000 - 0xffffffff00010000 (device)",
            ]
        );
    }

    #[test]
    fn range_display_names_class() {
        let range = MemoryRange {
            start: 0x1000,
            end: 0x2000,
            is_device: true,
        };
        assert_eq!(
            std::format!("{range}"),
            "paddr: 0x0000000000001000 - 0x0000000000002000 (device)"
        );
    }
}
