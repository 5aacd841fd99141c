//! Unit headers, the entry tree builder, and the `Dwarf` engine façade.

use std::borrow::Cow;
use std::rc::Rc;

use fnv::FnvHashMap as HashMap;

use crate::abbrev::{AbbrevCache, AbbrevTable};
use crate::constants::*;
use crate::die::{Attribute, AttributeValue, Die, DieId};
use crate::line::LineProgram;
use crate::location::LocationList;
use crate::range::RangeList;
use crate::read::Reader;
use crate::sections::{SectionId, Sections};
use crate::{Error, Result};

/// Whether a unit uses the 32- or 64-bit DWARF format.
///
/// Determined by the initial length field, and threaded through every
/// section-offset-valued form the unit decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Dwarf32,
    Dwarf64,
}

impl Format {
    /// The byte width of a section offset in this format.
    #[inline]
    pub fn word_size(self) -> u8 {
        match self {
            Format::Dwarf32 => 4,
            Format::Dwarf64 => 8,
        }
    }

    /// The serialized size of the initial length field.
    #[inline]
    pub fn initial_length_size(self) -> u8 {
        match self {
            Format::Dwarf32 => 4,
            Format::Dwarf64 => 12,
        }
    }
}

/// The encoding parameters shared by everything in one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub format: Format,
    pub version: u16,
    pub address_size: u8,
}

/// The kind of a unit, with the extra header fields some kinds carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    Compile,
    Partial,
    Type { signature: u64, type_offset: u64 },
    Skeleton { dwo_id: u64 },
    SplitCompile { dwo_id: u64 },
    SplitType { signature: u64, type_offset: u64 },
}

/// A unit header from the information section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitHeader {
    /// The offset of the unit's first byte in the information section.
    /// Identifies the unit uniquely.
    pub offset: u64,
    /// The declared length, excluding the initial length field itself.
    pub unit_length: u64,
    pub encoding: Encoding,
    /// The start offset of the unit's abbreviation table.
    pub abbrev_offset: u64,
    pub unit_type: UnitType,
    /// The size of the header; entries start at `offset + header_size`.
    pub header_size: u64,
}

impl UnitHeader {
    /// The offset one past the unit's last byte. For a well-formed section
    /// this is the next unit's header offset, or the section end.
    ///
    /// Saturates on an absurd declared length; the section range check in
    /// the entry parser reports those.
    #[inline]
    pub fn end_offset(&self) -> u64 {
        self.offset
            .saturating_add(u64::from(self.encoding.format.initial_length_size()))
            .saturating_add(self.unit_length)
    }

    /// Parse a header at the reader's current position.
    pub fn parse(reader: &mut Reader) -> Result<UnitHeader> {
        let offset = reader.offset();
        let (unit_length, format) = reader.initial_length()?;
        let version = reader.u16()?;
        if !(2..=5).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }
        let (abbrev_offset, address_size, unit_type) = if version >= 5 {
            let unit_type = DwUt(reader.u8()?);
            let address_size = reader.u8()?;
            let abbrev_offset = reader.offset_value(format)?;
            let unit_type = match unit_type {
                DW_UT_compile => UnitType::Compile,
                DW_UT_partial => UnitType::Partial,
                DW_UT_type => UnitType::Type {
                    signature: reader.u64()?,
                    type_offset: reader.offset_value(format)?,
                },
                DW_UT_skeleton => UnitType::Skeleton {
                    dwo_id: reader.u64()?,
                },
                DW_UT_split_compile => UnitType::SplitCompile {
                    dwo_id: reader.u64()?,
                },
                DW_UT_split_type => UnitType::SplitType {
                    signature: reader.u64()?,
                    type_offset: reader.offset_value(format)?,
                },
                other => {
                    return Err(Error::MalformedData(format!(
                        "unknown unit type {:#x} at {:#x}",
                        other.0, offset
                    )));
                }
            };
            (abbrev_offset, address_size, unit_type)
        } else {
            let abbrev_offset = reader.offset_value(format)?;
            let address_size = reader.u8()?;
            (abbrev_offset, address_size, UnitType::Compile)
        };
        Ok(UnitHeader {
            offset,
            unit_length,
            encoding: Encoding {
                format,
                version,
                address_size,
            },
            abbrev_offset,
            unit_type,
            header_size: reader.offset() - offset,
        })
    }
}

/// Index-table bases recorded from a unit root's attributes.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct UnitBases {
    pub addr_base: u64,
    pub str_offsets_base: u64,
    pub loclists_base: u64,
    pub rnglists_base: u64,
    /// The default base address for range and location lists.
    pub low_pc: u64,
}

/// One fully parsed unit: header, entry arena, and offset index.
///
/// Immutable once parsing finishes. Entry lookup by offset is O(1).
#[derive(Debug)]
pub struct Unit<'input> {
    header: UnitHeader,
    entries: Vec<Die<'input>>,
    root: Option<DieId>,
    offset_index: HashMap<u64, DieId>,
    pub(crate) bases: UnitBases,
    /// Errors that left this unit partially decoded. Empty for a clean
    /// decode. Later units are unaffected either way.
    errors: Vec<Error>,
}

impl<'input> Unit<'input> {
    fn new(header: UnitHeader) -> Self {
        Unit {
            header,
            entries: Vec::new(),
            root: None,
            offset_index: HashMap::default(),
            bases: UnitBases::default(),
            errors: Vec::new(),
        }
    }

    #[inline]
    pub fn header(&self) -> &UnitHeader {
        &self.header
    }

    /// The unit's starting offset in the information section.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.header.offset
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.header.encoding
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.header.encoding.version
    }

    #[inline]
    pub fn address_size(&self) -> u8 {
        self.header.encoding.address_size
    }

    /// The root entry, absent only for a unit whose decode failed before
    /// the first entry.
    pub fn root(&self) -> Option<&Die<'input>> {
        self.root.map(|id| &self.entries[id.0])
    }

    /// All entries in arena order, which is stream encounter order.
    #[inline]
    pub fn entries(&self) -> &[Die<'input>] {
        &self.entries
    }

    /// The entry with the given arena id.
    #[inline]
    pub fn die(&self, id: DieId) -> &Die<'input> {
        &self.entries[id.0]
    }

    /// The entry at the given information-section offset, if any.
    pub fn entry_at(&self, offset: u64) -> Option<&Die<'input>> {
        self.offset_index.get(&offset).map(|id| &self.entries[id.0])
    }

    /// Errors recorded while decoding this unit. Non-empty means the unit
    /// is partially decoded.
    #[inline]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    #[inline]
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether `offset` falls inside this unit's declared byte range.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.header.offset && offset < self.header.end_offset()
    }

    fn push_die(&mut self, die: Die<'input>, parents: &[DieId]) -> DieId {
        let id = DieId(self.entries.len());
        if let Some(&parent) = parents.last() {
            self.entries[parent.0].children.push(id);
        } else if self.root.is_none() {
            self.root = Some(id);
        }
        self.offset_index.insert(die.offset, id);
        self.entries.push(die);
        id
    }

    /// Materialize the unit's entry tree.
    ///
    /// On error the entries decoded so far are kept; the caller records
    /// the error and moves on to the next unit.
    fn parse_entries(&mut self, sections: &Sections<'input>, table: &AbbrevTable) -> Result<()> {
        let unit_offset = self.header.offset;
        let encoding = self.header.encoding;
        let end = self.header.end_offset();
        let mut reader =
            sections.reader(SectionId::DebugInfo, unit_offset + self.header.header_size)?;
        if end > reader.len() {
            return Err(Error::MalformedData(format!(
                "unit at {:#x} declares length past the end of the section",
                unit_offset
            )));
        }

        // The ancestor stack: entries whose children are still being read.
        let mut parents: Vec<DieId> = Vec::new();
        while reader.offset() < end {
            let die_offset = reader.offset();
            let code = reader.uleb128()?;
            if code == 0 {
                // End of the current sibling chain; pop one level. At top
                // level this terminates the unit.
                if parents.pop().is_none() {
                    break;
                }
                continue;
            }
            let abbrev = table.get(code).ok_or(Error::InvalidAbbrevCode {
                code,
                unit_offset,
            })?;
            let mut die = Die {
                offset: die_offset,
                tag: abbrev.tag,
                has_children: abbrev.has_children,
                attrs: Vec::with_capacity(abbrev.attributes.len()),
                parent: parents.last().copied(),
                children: Vec::new(),
            };
            for spec in &abbrev.attributes {
                match AttributeValue::parse(&mut reader, *spec, encoding, unit_offset) {
                    Ok(value) => die.attrs.push(Attribute {
                        at: spec.at,
                        value,
                    }),
                    Err(e) => {
                        // Surface the failure in the attribute's slot, keep
                        // the entry, and stop: past an undecodable form the
                        // stream position is no longer trustworthy.
                        die.attrs.push(Attribute {
                            at: spec.at,
                            value: AttributeValue::Unsupported(spec.form),
                        });
                        self.push_die(die, &parents);
                        return Err(e);
                    }
                }
            }
            let id = self.push_die(die, &parents);
            if abbrev.has_children {
                parents.push(id);
            }
        }

        if reader.offset() != end {
            return Err(Error::MalformedData(format!(
                "unit at {:#x} ended at {:#x}, expected {:#x}",
                unit_offset,
                reader.offset(),
                end
            )));
        }
        Ok(())
    }

    /// Record index-table bases and the default list base address from the
    /// root entry's attributes.
    ///
    /// A base attribute carried in a non-offset form is recorded as an
    /// error; the base stays at its default and resolution through it
    /// fails rather than using a guessed value.
    fn record_bases(&mut self) {
        let root = match self.root() {
            Some(root) => root,
            None => return,
        };
        let unit_offset = self.header.offset;
        let mut bases = UnitBases::default();
        let mut errors = Vec::new();
        for attr in root.attrs() {
            let slot = match attr.at {
                DW_AT_addr_base => &mut bases.addr_base,
                DW_AT_str_offsets_base => &mut bases.str_offsets_base,
                DW_AT_loclists_base => &mut bases.loclists_base,
                DW_AT_rnglists_base => &mut bases.rnglists_base,
                DW_AT_low_pc => {
                    if let AttributeValue::Address(addr) = attr.value {
                        bases.low_pc = addr;
                    }
                    continue;
                }
                _ => continue,
            };
            match attr.value.sec_offset() {
                Some(offset) => *slot = offset,
                None => errors.push(Error::MalformedData(format!(
                    "{} with a non-offset form in unit at {:#x}",
                    attr.at, unit_offset
                ))),
            }
        }
        self.bases = bases;
        self.errors.extend(errors);
    }
}

/// The decoding engine: borrowed sections, the abbreviation cache, and the
/// decoded units.
///
/// Owns every materialized structure for its lifetime; the section bytes
/// are borrowed and must outlive it. Already-decoded units are never
/// mutated, so lookups and lazy resolution can run freely after the
/// initial pass.
#[derive(Debug)]
pub struct Dwarf<'input> {
    sections: Sections<'input>,
    units: Vec<Unit<'input>>,
    abbrev_cache: AbbrevCache,
}

impl<'input> Dwarf<'input> {
    /// Decode every unit in the information section.
    ///
    /// Each unit is an independent recovery boundary: a failure inside one
    /// is recorded on that unit and scanning resumes at the next declared
    /// header offset. Only a header so damaged that the next boundary is
    /// unknowable stops the scan.
    pub fn parse(sections: Sections<'input>) -> Dwarf<'input> {
        let mut abbrev_cache = AbbrevCache::new();
        let mut units = Vec::new();
        let section_len = sections.data(SectionId::DebugInfo).len() as u64;
        let mut offset = 0;
        while offset < section_len {
            let mut reader = match sections.reader(SectionId::DebugInfo, offset) {
                Ok(reader) => reader,
                Err(_) => break,
            };
            let header = match UnitHeader::parse(&mut reader) {
                Ok(header) => header,
                Err(e) => {
                    // Without a length field there is no next boundary.
                    warn!("giving up on unit scan at {:#x}: {}", offset, e);
                    break;
                }
            };
            let next = header.end_offset();
            let mut unit = Unit::new(header);
            match Dwarf::parse_unit(&sections, &mut abbrev_cache, &mut unit) {
                Ok(()) => {}
                Err(e) => {
                    debug!("unit at {:#x} partially decoded: {}", offset, e);
                    unit.errors.push(e);
                }
            }
            unit.record_bases();
            units.push(unit);
            if next <= offset || next > section_len {
                break;
            }
            offset = next;
        }
        Dwarf {
            sections,
            units,
            abbrev_cache,
        }
    }

    fn parse_unit(
        sections: &Sections<'input>,
        abbrev_cache: &mut AbbrevCache,
        unit: &mut Unit<'input>,
    ) -> Result<()> {
        // A missing abbreviation table is fatal for this unit only.
        let table: Rc<AbbrevTable> = abbrev_cache.get(sections, unit.header.abbrev_offset)?;
        unit.parse_entries(sections, &table)
    }

    #[inline]
    pub fn sections(&self) -> &Sections<'input> {
        &self.sections
    }

    /// The decoded units, in information-section order.
    #[inline]
    pub fn units(&self) -> &[Unit<'input>] {
        &self.units
    }

    /// The number of abbreviation tables decoded (shared tables count once).
    #[inline]
    pub fn abbrev_table_count(&self) -> usize {
        self.abbrev_cache.len()
    }

    /// The unit whose byte range contains `offset`.
    pub fn unit_containing(&self, offset: u64) -> Option<&Unit<'input>> {
        // Units are sorted by start offset; find the last start <= offset.
        let index = self
            .units
            .partition_point(|unit| unit.offset() <= offset)
            .checked_sub(1)?;
        let unit = &self.units[index];
        if unit.contains(offset) {
            Some(unit)
        } else {
            None
        }
    }

    /// Resolve a reference attribute to its target entry.
    ///
    /// Unit-relative references are resolved against `unit`; section-global
    /// references may land in any unit. A computed offset that does not
    /// fall exactly on a known entry boundary is `UnresolvedReference`.
    pub fn resolve_ref<'a>(
        &'a self,
        unit: &'a Unit<'input>,
        value: &AttributeValue<'input>,
    ) -> Result<(&'a Unit<'input>, &'a Die<'input>)> {
        let offset = match *value {
            // A unit-relative offset of zero names the unit itself; it
            // resolves to the root entry.
            AttributeValue::UnitRef(0) => {
                let root = unit
                    .root()
                    .ok_or(Error::UnresolvedReference {
                        offset: unit.offset(),
                    })?;
                return Ok((unit, root));
            }
            AttributeValue::UnitRef(offset) => unit.offset().saturating_add(offset),
            AttributeValue::DebugInfoRef(offset) => offset,
            _ => {
                return Err(Error::MalformedData(
                    "attribute is not a resolvable reference".into(),
                ));
            }
        };
        let owner = self
            .unit_containing(offset)
            .ok_or(Error::UnresolvedReference { offset })?;
        let die = owner
            .entry_at(offset)
            .ok_or(Error::UnresolvedReference { offset })?;
        Ok((owner, die))
    }

    /// Look up an address in the unit's `.debug_addr` slice.
    pub fn address(&self, unit: &Unit<'input>, index: u64) -> Result<u64> {
        let encoding = unit.encoding();
        let offset = unit
            .bases
            .addr_base
            .saturating_add(index.saturating_mul(u64::from(encoding.address_size)));
        let mut reader = self.sections.reader(SectionId::DebugAddr, offset)?;
        reader.address(encoding.address_size)
    }

    /// Resolve a string-valued attribute, lazily.
    ///
    /// Handles inline strings, `.debug_str` and `.debug_line_str` offsets,
    /// and `.debug_str_offsets` indices. Idempotent: the backing bytes are
    /// immutable.
    pub fn attr_string(
        &self,
        unit: &Unit<'input>,
        value: &AttributeValue<'input>,
    ) -> Result<Cow<'input, str>> {
        let bytes = match *value {
            AttributeValue::String(bytes) => bytes,
            AttributeValue::StrRef(offset) => self.string_at(SectionId::DebugStr, offset)?,
            AttributeValue::LineStrRef(offset) => {
                self.string_at(SectionId::DebugLineStr, offset)?
            }
            AttributeValue::StrIndex(index) => {
                let encoding = unit.encoding();
                let offset = unit
                    .bases
                    .str_offsets_base
                    .saturating_add(index.saturating_mul(u64::from(encoding.format.word_size())));
                let mut reader = self.sections.reader(SectionId::DebugStrOffsets, offset)?;
                let str_offset = reader.offset_value(encoding.format)?;
                self.string_at(SectionId::DebugStr, str_offset)?
            }
            _ => {
                return Err(Error::MalformedData(
                    "attribute is not a string".into(),
                ));
            }
        };
        Ok(String::from_utf8_lossy(bytes))
    }

    fn string_at(&self, section: SectionId, offset: u64) -> Result<&'input [u8]> {
        let mut reader = self.sections.reader(section, offset)?;
        reader.string()
    }

    /// The unit's line number program, if its root entry references one.
    pub fn line_program(&self, unit: &Unit<'input>) -> Result<Option<LineProgram<'input>>> {
        let offset = match unit.root().and_then(Die::stmt_list) {
            Some(offset) => offset,
            None => return Ok(None),
        };
        LineProgram::parse(&self.sections, offset, unit.encoding()).map(Some)
    }

    /// Decode the range list referenced by an attribute value.
    pub fn ranges(
        &self,
        unit: &Unit<'input>,
        value: &AttributeValue<'input>,
    ) -> Result<RangeList> {
        crate::range::parse_range_list(self, unit, value)
    }

    /// Decode the location list referenced by an attribute value.
    pub fn locations(
        &self,
        unit: &Unit<'input>,
        value: &AttributeValue<'input>,
    ) -> Result<LocationList<'input>> {
        crate::location::parse_location_list(self, unit, value)
    }
}
