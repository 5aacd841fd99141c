//! Location lists: PC-range-keyed location expressions.
//!
//! Expressions are carried as uninterpreted operation streams; evaluating
//! them against registers or memory is out of scope.

use crate::constants::*;
use crate::die::AttributeValue;
use crate::range::{base_sentinel, list_offset, Range};
use crate::sections::SectionId;
use crate::unit::{Dwarf, Unit};
use crate::{Error, Result};

/// One entry of a location list: the PC range and the expression that
/// describes the object's location over that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationListEntry<'input> {
    pub range: Range,
    pub expr: &'input [u8],
}

/// A decoded location list, in on-disk entry order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LocationList<'input> {
    entries: Vec<LocationListEntry<'input>>,
}

impl<'input> LocationList<'input> {
    /// The entries in the list.
    #[inline]
    pub fn list(&self) -> &[LocationListEntry<'input>] {
        &self.entries
    }

    /// The expression covering `address`, if any entry's range contains it.
    pub fn at(&self, address: u64) -> Option<&'input [u8]> {
        self.entries
            .iter()
            .find(|entry| entry.range.contains(address))
            .map(|entry| entry.expr)
    }
}

// Decode the location list an attribute refers to, choosing the encoding
// scheme by unit version just as for range lists.
pub(crate) fn parse_location_list<'input>(
    dwarf: &Dwarf<'input>,
    unit: &Unit<'input>,
    value: &AttributeValue<'input>,
) -> Result<LocationList<'input>> {
    match *value {
        AttributeValue::SecOffset(offset) | AttributeValue::Udata(offset) => {
            if unit.version() >= 5 {
                parse_loclist(dwarf, unit, offset)
            } else {
                parse_legacy_loc(dwarf, unit, offset)
            }
        }
        AttributeValue::LocListIndex(index) => {
            let offset = list_offset(
                dwarf,
                unit,
                SectionId::DebugLocLists,
                unit.bases.loclists_base,
                index,
            )?;
            parse_loclist(dwarf, unit, offset)
        }
        _ => Err(Error::MalformedData(
            "attribute does not refer to a location list".into(),
        )),
    }
}

fn parse_legacy_loc<'input>(
    dwarf: &Dwarf<'input>,
    unit: &Unit<'input>,
    offset: u64,
) -> Result<LocationList<'input>> {
    let address_size = unit.address_size();
    let sentinel = base_sentinel(address_size);
    let mut base = unit.bases.low_pc;
    let mut reader = dwarf.sections().reader(SectionId::DebugLoc, offset)?;
    let mut list = LocationList::default();
    loop {
        let begin = reader.address(address_size)?;
        let end = reader.address(address_size)?;
        if begin == 0 && end == 0 {
            return Ok(list);
        }
        if begin == sentinel {
            base = end;
            continue;
        }
        let expr_len = u64::from(reader.u16()?);
        let expr = reader.bytes(expr_len)?;
        list.entries.push(LocationListEntry {
            range: Range {
                begin: base.saturating_add(begin),
                end: base.saturating_add(end),
            },
            expr,
        });
    }
}

fn parse_loclist<'input>(
    dwarf: &Dwarf<'input>,
    unit: &Unit<'input>,
    offset: u64,
) -> Result<LocationList<'input>> {
    let address_size = unit.address_size();
    let mut base = unit.bases.low_pc;
    let mut reader = dwarf.sections().reader(SectionId::DebugLocLists, offset)?;
    let mut list = LocationList::default();
    loop {
        let kind = DwLle(reader.u8()?);
        let range = match kind {
            DW_LLE_end_of_list => return Ok(list),
            DW_LLE_base_addressx => {
                let index = reader.uleb128()?;
                base = dwarf.address(unit, index)?;
                continue;
            }
            DW_LLE_base_address => {
                base = reader.address(address_size)?;
                continue;
            }
            DW_LLE_startx_endx => {
                let begin = dwarf.address(unit, reader.uleb128()?)?;
                let end = dwarf.address(unit, reader.uleb128()?)?;
                Range { begin, end }
            }
            DW_LLE_startx_length => {
                let begin = dwarf.address(unit, reader.uleb128()?)?;
                let length = reader.uleb128()?;
                Range {
                    begin,
                    end: begin.saturating_add(length),
                }
            }
            DW_LLE_offset_pair => {
                let begin = reader.uleb128()?;
                let end = reader.uleb128()?;
                Range {
                    begin: base.saturating_add(begin),
                    end: base.saturating_add(end),
                }
            }
            DW_LLE_default_location => {
                // The fallback location when no range matches.
                Range {
                    begin: 0,
                    end: u64::MAX,
                }
            }
            DW_LLE_start_end => {
                let begin = reader.address(address_size)?;
                let end = reader.address(address_size)?;
                Range { begin, end }
            }
            DW_LLE_start_length => {
                let begin = reader.address(address_size)?;
                let length = reader.uleb128()?;
                Range {
                    begin,
                    end: begin.saturating_add(length),
                }
            }
            unknown => {
                return Err(Error::MalformedData(format!(
                    "unknown location list entry kind {:#x}",
                    unknown.0
                )));
            }
        };
        let expr_len = reader.uleb128()?;
        let expr = reader.bytes(expr_len)?;
        list.entries.push(LocationListEntry { range, expr });
    }
}
