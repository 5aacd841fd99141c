//! Address ranges and the two on-disk range list encodings.

use std::mem;

use crate::constants::*;
use crate::die::AttributeValue;
use crate::sections::SectionId;
use crate::unit::{Dwarf, Unit};
use crate::{Error, Result};

/// An address range.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Range {
    /// The beginning of the address range (inclusive).
    pub begin: u64,

    /// The end of the address range (exclusive).
    pub end: u64,
}

impl Range {
    /// The size of the address range.
    #[inline]
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    /// Return true if the range contains the value.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        self.begin <= addr && addr < self.end
    }
}

/// A list of address ranges.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangeList {
    ranges: Vec<Range>,
}

impl RangeList {
    /// The ranges in the list.
    #[inline]
    pub fn list(&self) -> &[Range] {
        &self.ranges
    }

    /// The total size of the ranges in the list.
    pub fn size(&self) -> u64 {
        let mut size = 0u64;
        for range in &self.ranges {
            size = size.saturating_add(range.size());
        }
        size
    }

    /// Append a range, combining with the previous range if possible.
    pub fn push(&mut self, range: Range) {
        if range.end <= range.begin {
            debug!("invalid range: {:?}", range);
            return;
        }
        if let Some(prev) = self.ranges.last_mut() {
            // Merge ranges if the new range begins in or immediately after
            // the previous range.
            if range.begin >= prev.begin && range.begin <= prev.end {
                if prev.end < range.end {
                    prev.end = range.end;
                }
                return;
            }
        }
        self.ranges.push(range);
    }

    /// Sort the ranges by beginning address, and combine ranges where
    /// possible.
    pub fn sort(&mut self) {
        self.ranges.sort_by(|a, b| a.begin.cmp(&b.begin));
        // Combine ranges by adding to a new list.
        let mut ranges = Vec::new();
        mem::swap(&mut ranges, &mut self.ranges);
        for range in ranges {
            self.push(range);
        }
    }
}

// Decode the range list an attribute refers to. The encoding scheme is
// chosen by the unit's version: 5 and later use the kind-tagged
// `.debug_rnglists` entries, earlier versions the sentinel-delimited
// `.debug_ranges` pairs.
pub(crate) fn parse_range_list(
    dwarf: &Dwarf,
    unit: &Unit,
    value: &AttributeValue,
) -> Result<RangeList> {
    match *value {
        AttributeValue::SecOffset(offset) | AttributeValue::Udata(offset) => {
            if unit.version() >= 5 {
                parse_rnglist(dwarf, unit, offset)
            } else {
                parse_legacy_ranges(dwarf, unit, offset)
            }
        }
        AttributeValue::RngListIndex(index) => {
            let offset = list_offset(
                dwarf,
                unit,
                SectionId::DebugRngLists,
                unit.bases.rnglists_base,
                index,
            )?;
            parse_rnglist(dwarf, unit, offset)
        }
        _ => Err(Error::MalformedData(
            "attribute does not refer to a range list".into(),
        )),
    }
}

// Read an entry of the offset array that index-encoded list attributes go
// through. Array values are relative to the recorded base.
pub(crate) fn list_offset(
    dwarf: &Dwarf,
    unit: &Unit,
    section: SectionId,
    base: u64,
    index: u64,
) -> Result<u64> {
    let format = unit.encoding().format;
    let mut reader = dwarf.sections().reader(
        section,
        base.saturating_add(index.saturating_mul(u64::from(format.word_size()))),
    )?;
    Ok(base.saturating_add(reader.offset_value(format)?))
}

// The all-ones tombstone that marks a base-address-selection entry in the
// legacy encoding, at the unit's address width.
pub(crate) fn base_sentinel(address_size: u8) -> u64 {
    if address_size >= 8 {
        u64::MAX
    } else {
        (1u64 << (u64::from(address_size) * 8)) - 1
    }
}

fn parse_legacy_ranges(dwarf: &Dwarf, unit: &Unit, offset: u64) -> Result<RangeList> {
    let address_size = unit.address_size();
    let sentinel = base_sentinel(address_size);
    let mut base = unit.bases.low_pc;
    let mut reader = dwarf.sections().reader(SectionId::DebugRanges, offset)?;
    let mut list = RangeList::default();
    loop {
        let begin = reader.address(address_size)?;
        let end = reader.address(address_size)?;
        if begin == 0 && end == 0 {
            return Ok(list);
        }
        if begin == sentinel {
            // Base address selection; applies to subsequent entries until
            // replaced.
            base = end;
            continue;
        }
        list.ranges.push(Range {
            begin: base.saturating_add(begin),
            end: base.saturating_add(end),
        });
    }
}

fn parse_rnglist(dwarf: &Dwarf, unit: &Unit, offset: u64) -> Result<RangeList> {
    let address_size = unit.address_size();
    let mut base = unit.bases.low_pc;
    let mut reader = dwarf.sections().reader(SectionId::DebugRngLists, offset)?;
    let mut list = RangeList::default();
    loop {
        let kind = DwRle(reader.u8()?);
        let range = match kind {
            DW_RLE_end_of_list => return Ok(list),
            DW_RLE_base_addressx => {
                let index = reader.uleb128()?;
                base = dwarf.address(unit, index)?;
                continue;
            }
            DW_RLE_base_address => {
                base = reader.address(address_size)?;
                continue;
            }
            DW_RLE_startx_endx => {
                let begin = dwarf.address(unit, reader.uleb128()?)?;
                let end = dwarf.address(unit, reader.uleb128()?)?;
                Range { begin, end }
            }
            DW_RLE_startx_length => {
                let begin = dwarf.address(unit, reader.uleb128()?)?;
                let length = reader.uleb128()?;
                Range {
                    begin,
                    end: begin.saturating_add(length),
                }
            }
            DW_RLE_offset_pair => {
                let begin = reader.uleb128()?;
                let end = reader.uleb128()?;
                Range {
                    begin: base.saturating_add(begin),
                    end: base.saturating_add(end),
                }
            }
            DW_RLE_start_end => {
                let begin = reader.address(address_size)?;
                let end = reader.address(address_size)?;
                Range { begin, end }
            }
            DW_RLE_start_length => {
                let begin = reader.address(address_size)?;
                let length = reader.uleb128()?;
                Range {
                    begin,
                    end: begin.saturating_add(length),
                }
            }
            unknown => {
                return Err(Error::MalformedData(format!(
                    "unknown range list entry kind {:#x}",
                    unknown.0
                )));
            }
        };
        list.ranges.push(range);
    }
}
