//! Decoding of `.debug_abbrev` tables.
//!
//! Each unit header names a table start offset; the table maps abbreviation
//! codes to declarations that entries in the information section reference
//! instead of repeating their attribute layout inline.

use std::rc::Rc;

use fnv::FnvHashMap as HashMap;

use crate::constants::{DwAt, DwForm, DwTag, DW_FORM_implicit_const};
use crate::read::Reader;
use crate::sections::{SectionId, Sections};
use crate::{Error, Result};

/// One attribute slot in an abbreviation declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub at: DwAt,
    pub form: DwForm,
    /// For `DW_FORM_implicit_const`, the value lives here rather than in
    /// the entry stream.
    pub implicit_const: Option<i64>,
}

/// An abbreviation declaration: the shape shared by every entry that
/// references its code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbrev {
    pub code: u64,
    pub tag: DwTag,
    pub has_children: bool,
    pub attributes: Vec<AttrSpec>,
}

/// One table of abbreviation declarations, keyed by code.
///
/// Code 0 is the sibling-chain terminator and never has a declaration.
#[derive(Debug, Default)]
pub struct AbbrevTable {
    abbrevs: HashMap<u64, Abbrev>,
}

impl AbbrevTable {
    /// Decode the table starting at `offset` in the abbreviation section.
    ///
    /// Decoding stops at the first terminator code at top level. A
    /// truncated declaration or attribute pair is `MalformedData`.
    pub fn parse(sections: &Sections, offset: u64) -> Result<AbbrevTable> {
        let mut reader = sections.reader(SectionId::DebugAbbrev, offset)?;
        match AbbrevTable::parse_table(&mut reader, offset) {
            Err(Error::TruncatedSection { offset, .. }) => Err(Error::MalformedData(format!(
                "truncated abbreviation declaration at {:#x}",
                offset
            ))),
            result => result,
        }
    }

    fn parse_table(reader: &mut Reader, offset: u64) -> Result<AbbrevTable> {
        let mut table = AbbrevTable::default();
        loop {
            let code = reader.uleb128()?;
            if code == 0 {
                return Ok(table);
            }
            let abbrev = Abbrev::parse(reader, code)?;
            if table.abbrevs.insert(code, abbrev).is_some() {
                return Err(Error::MalformedData(format!(
                    "duplicate abbreviation code {} in table at {:#x}",
                    code, offset
                )));
            }
        }
    }

    /// Look up the declaration for a code.
    #[inline]
    pub fn get(&self, code: u64) -> Option<&Abbrev> {
        self.abbrevs.get(&code)
    }

    /// The number of declarations in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.abbrevs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.abbrevs.is_empty()
    }
}

impl Abbrev {
    fn parse(reader: &mut Reader, code: u64) -> Result<Abbrev> {
        let tag = DwTag(reader.uleb128()? as u16);
        let has_children = match reader.u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(Error::MalformedData(format!(
                    "bad has-children flag {} for abbreviation {}",
                    other, code
                )));
            }
        };
        let mut attributes = Vec::new();
        loop {
            let at = reader.uleb128()?;
            let form = reader.uleb128()?;
            if at == 0 && form == 0 {
                break;
            }
            if at == 0 || form == 0 {
                return Err(Error::MalformedData(format!(
                    "unbalanced attribute terminator pair ({}, {})",
                    at, form
                )));
            }
            let form = DwForm(form as u16);
            let implicit_const = if form == DW_FORM_implicit_const {
                Some(reader.sleb128()?)
            } else {
                None
            };
            attributes.push(AttrSpec {
                at: DwAt(at as u16),
                form,
                implicit_const,
            });
        }
        Ok(Abbrev {
            code,
            tag,
            has_children,
            attributes,
        })
    }
}

/// A read-through cache of abbreviation tables keyed by section offset.
///
/// Units routinely share one table; the cache decodes each table at most
/// once and hands out shared references. Owned by the engine instance,
/// discarded with it.
#[derive(Debug, Default)]
pub struct AbbrevCache {
    tables: HashMap<u64, Rc<AbbrevTable>>,
}

impl AbbrevCache {
    pub fn new() -> Self {
        AbbrevCache::default()
    }

    /// The table at `offset`, decoding it on first request.
    ///
    /// A failed decode is not cached; previously decoded tables stay
    /// intact.
    pub fn get(&mut self, sections: &Sections, offset: u64) -> Result<Rc<AbbrevTable>> {
        if let Some(table) = self.tables.get(&offset) {
            return Ok(table.clone());
        }
        let table = Rc::new(AbbrevTable::parse(sections, offset)?);
        self.tables.insert(offset, table.clone());
        Ok(table)
    }

    /// The number of decoded tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::*;
    use crate::read::Endian;

    #[test]
    fn table() {
        // Code 1: compile_unit, has children, name=string, language=data1.
        // Code 2: base_type, no children, name=string.
        let data = [
            0x01, 0x11, 0x01, 0x03, 0x08, 0x13, 0x0b, 0x00, 0x00, //
            0x02, 0x24, 0x00, 0x03, 0x08, 0x00, 0x00, //
            0x00,
        ];
        let mut sections = Sections::new(Endian::Little);
        sections.debug_abbrev = &data;
        let table = AbbrevTable::parse(&sections, 0).unwrap();
        assert_eq!(table.len(), 2);
        let cu = table.get(1).unwrap();
        assert_eq!(cu.tag, DW_TAG_compile_unit);
        assert!(cu.has_children);
        assert_eq!(cu.attributes.len(), 2);
        assert_eq!(cu.attributes[0].at, DW_AT_name);
        assert_eq!(cu.attributes[0].form, DW_FORM_string);
        let base = table.get(2).unwrap();
        assert_eq!(base.tag, DW_TAG_base_type);
        assert!(!base.has_children);
        assert!(table.get(3).is_none());
    }

    #[test]
    fn implicit_const() {
        // Code 1: variable, no children, const_value=implicit_const(-9).
        let data = [0x01, 0x34, 0x00, 0x1c, 0x21, 0x77, 0x00, 0x00, 0x00];
        let mut sections = Sections::new(Endian::Little);
        sections.debug_abbrev = &data;
        let table = AbbrevTable::parse(&sections, 0).unwrap();
        let spec = table.get(1).unwrap().attributes[0];
        assert_eq!(spec.form, DW_FORM_implicit_const);
        assert_eq!(spec.implicit_const, Some(-9));
    }

    #[test]
    fn truncated_leaves_cache_intact() {
        // A valid, terminated table at offset 0; a truncated declaration
        // at offset 6.
        let data = [
            0x01, 0x24, 0x00, 0x00, 0x00, 0x00, // code 1, no attrs, table end
            0x01, 0x24, 0x00, 0x03, // cut off mid attribute pair
        ];
        let mut sections = Sections::new(Endian::Little);
        sections.debug_abbrev = &data;
        let mut cache = AbbrevCache::new();
        cache.get(&sections, 0).unwrap();
        match cache.get(&sections, 6) {
            Err(Error::MalformedData(_)) => {}
            other => panic!("expected MalformedData, got {:?}", other),
        }
        assert_eq!(cache.len(), 1);
        // The good table is still served from the cache.
        assert_eq!(cache.get(&sections, 0).unwrap().len(), 1);
    }
}
