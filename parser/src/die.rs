//! Debugging information entries and their attribute values.
//!
//! All entries of a unit live in one arena (`Vec<Die>`); tree structure is
//! stored as indices into that arena, never as owning references.

use crate::abbrev::AttrSpec;
use crate::constants::*;
use crate::read::Reader;
use crate::unit::Encoding;
use crate::{Error, Result};

/// An index into a unit's entry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DieId(pub usize);

/// A decoded attribute value.
///
/// String and reference variants are unresolved: they hold the offset or
/// index read from the stream, and resolution against the backing sections
/// happens on demand (see `Dwarf::attr_string` and `Dwarf::resolve_ref`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue<'input> {
    /// A program address.
    Address(u64),
    /// An index into the unit's `.debug_addr` slice.
    AddrIndex(u64),
    /// An unsigned constant.
    Udata(u64),
    /// A signed constant.
    Sdata(i64),
    /// A boolean flag.
    Flag(bool),
    /// A string stored inline in the information section.
    String(&'input [u8]),
    /// An offset into `.debug_str`.
    StrRef(u64),
    /// An offset into `.debug_line_str`.
    LineStrRef(u64),
    /// An index into the unit's `.debug_str_offsets` slice.
    StrIndex(u64),
    /// An opaque block of bytes.
    Block(&'input [u8]),
    /// A 16-byte constant, used for MD5 sums among other things.
    Data16([u8; 16]),
    /// A location expression, kept as an uninterpreted operation stream.
    Exprloc(&'input [u8]),
    /// A reference to an entry, relative to the owning unit's start.
    UnitRef(u64),
    /// A reference to an entry by information-section offset.
    DebugInfoRef(u64),
    /// A reference into a supplementary object file.
    SupRef(u64),
    /// A type unit signature.
    TypeSignature(u64),
    /// An offset into some non-information section, disambiguated by the
    /// attribute it appears on.
    SecOffset(u64),
    /// An index into the unit's `.debug_loclists` offset table.
    LocListIndex(u64),
    /// An index into the unit's `.debug_rnglists` offset table.
    RngListIndex(u64),
    /// The attribute could not be decoded; the form is preserved for
    /// diagnostics. Never silently substituted with a guess.
    Unsupported(DwForm),
}

impl<'input> AttributeValue<'input> {
    /// The value as an unsigned constant, if it is one.
    pub fn udata(&self) -> Option<u64> {
        match *self {
            AttributeValue::Udata(value) => Some(value),
            AttributeValue::Sdata(value) if value >= 0 => Some(value as u64),
            _ => None,
        }
    }

    /// The value as a section offset, if it is one.
    ///
    /// DWARF 2 and 3 producers used plain constants where later versions
    /// use `DW_FORM_sec_offset`, so constants are accepted here.
    pub fn sec_offset(&self) -> Option<u64> {
        match *self {
            AttributeValue::SecOffset(value) => Some(value),
            AttributeValue::Udata(value) => Some(value),
            _ => None,
        }
    }

    /// Decode one value with the given form, advancing the reader.
    pub(crate) fn parse(
        reader: &mut Reader<'input>,
        spec: AttrSpec,
        encoding: Encoding,
        unit_offset: u64,
    ) -> Result<AttributeValue<'input>> {
        if spec.form == DW_FORM_implicit_const {
            // The value was stored in the abbreviation declaration.
            return match spec.implicit_const {
                Some(value) => Ok(AttributeValue::Sdata(value)),
                None => Err(Error::MalformedData(
                    "implicit_const form without a declared value".into(),
                )),
            };
        }
        AttributeValue::parse_form(reader, spec.form, encoding, unit_offset, false)
    }

    fn parse_form(
        reader: &mut Reader<'input>,
        form: DwForm,
        encoding: Encoding,
        unit_offset: u64,
        indirect: bool,
    ) -> Result<AttributeValue<'input>> {
        let value = match form {
            DW_FORM_addr => AttributeValue::Address(reader.address(encoding.address_size)?),
            DW_FORM_block1 => {
                let len = u64::from(reader.u8()?);
                AttributeValue::Block(reader.bytes(len)?)
            }
            DW_FORM_block2 => {
                let len = u64::from(reader.u16()?);
                AttributeValue::Block(reader.bytes(len)?)
            }
            DW_FORM_block4 => {
                let len = u64::from(reader.u32()?);
                AttributeValue::Block(reader.bytes(len)?)
            }
            DW_FORM_block => {
                let len = reader.uleb128()?;
                AttributeValue::Block(reader.bytes(len)?)
            }
            DW_FORM_data1 => AttributeValue::Udata(u64::from(reader.u8()?)),
            DW_FORM_data2 => AttributeValue::Udata(u64::from(reader.u16()?)),
            DW_FORM_data4 => AttributeValue::Udata(u64::from(reader.u32()?)),
            DW_FORM_data8 => AttributeValue::Udata(reader.u64()?),
            DW_FORM_data16 => {
                let bytes = reader.bytes(16)?;
                let mut data = [0; 16];
                data.copy_from_slice(bytes);
                AttributeValue::Data16(data)
            }
            DW_FORM_udata => AttributeValue::Udata(reader.uleb128()?),
            DW_FORM_sdata => AttributeValue::Sdata(reader.sleb128()?),
            DW_FORM_string => AttributeValue::String(reader.string()?),
            DW_FORM_strp => AttributeValue::StrRef(reader.offset_value(encoding.format)?),
            DW_FORM_line_strp => AttributeValue::LineStrRef(reader.offset_value(encoding.format)?),
            DW_FORM_strp_sup => AttributeValue::SupRef(reader.offset_value(encoding.format)?),
            DW_FORM_strx => AttributeValue::StrIndex(reader.uleb128()?),
            DW_FORM_strx1 => AttributeValue::StrIndex(u64::from(reader.u8()?)),
            DW_FORM_strx2 => AttributeValue::StrIndex(u64::from(reader.u16()?)),
            DW_FORM_strx3 => AttributeValue::StrIndex(read_u24(reader)?),
            DW_FORM_strx4 => AttributeValue::StrIndex(u64::from(reader.u32()?)),
            DW_FORM_addrx => AttributeValue::AddrIndex(reader.uleb128()?),
            DW_FORM_addrx1 => AttributeValue::AddrIndex(u64::from(reader.u8()?)),
            DW_FORM_addrx2 => AttributeValue::AddrIndex(u64::from(reader.u16()?)),
            DW_FORM_addrx3 => AttributeValue::AddrIndex(read_u24(reader)?),
            DW_FORM_addrx4 => AttributeValue::AddrIndex(u64::from(reader.u32()?)),
            DW_FORM_flag => AttributeValue::Flag(reader.u8()? != 0),
            DW_FORM_flag_present => AttributeValue::Flag(true),
            DW_FORM_ref1 => AttributeValue::UnitRef(u64::from(reader.u8()?)),
            DW_FORM_ref2 => AttributeValue::UnitRef(u64::from(reader.u16()?)),
            DW_FORM_ref4 => AttributeValue::UnitRef(u64::from(reader.u32()?)),
            DW_FORM_ref8 => AttributeValue::UnitRef(reader.u64()?),
            DW_FORM_ref_udata => AttributeValue::UnitRef(reader.uleb128()?),
            DW_FORM_ref_addr => {
                // DWARF 2 encoded this with the address size; every later
                // version uses the offset size.
                let offset = if encoding.version == 2 {
                    reader.address(encoding.address_size)?
                } else {
                    reader.offset_value(encoding.format)?
                };
                AttributeValue::DebugInfoRef(offset)
            }
            DW_FORM_ref_sup4 => AttributeValue::SupRef(u64::from(reader.u32()?)),
            DW_FORM_ref_sup8 => AttributeValue::SupRef(reader.u64()?),
            DW_FORM_ref_sig8 => AttributeValue::TypeSignature(reader.u64()?),
            DW_FORM_sec_offset => AttributeValue::SecOffset(reader.offset_value(encoding.format)?),
            DW_FORM_exprloc => {
                let len = reader.uleb128()?;
                AttributeValue::Exprloc(reader.bytes(len)?)
            }
            DW_FORM_loclistx => AttributeValue::LocListIndex(reader.uleb128()?),
            DW_FORM_rnglistx => AttributeValue::RngListIndex(reader.uleb128()?),
            DW_FORM_indirect => {
                if indirect {
                    return Err(Error::MalformedData(
                        "nested DW_FORM_indirect".into(),
                    ));
                }
                let real = DwForm(reader.uleb128()? as u16);
                if real == DW_FORM_implicit_const {
                    return Err(Error::MalformedData(
                        "DW_FORM_indirect to implicit_const".into(),
                    ));
                }
                return AttributeValue::parse_form(reader, real, encoding, unit_offset, true);
            }
            _ => {
                return Err(Error::UnsupportedForm { form, unit_offset });
            }
        };
        Ok(value)
    }
}

fn read_u24(reader: &mut Reader) -> Result<u64> {
    let b = reader.bytes(3)?;
    Ok(match reader.endian() {
        crate::read::Endian::Little => {
            u64::from(b[0]) | u64::from(b[1]) << 8 | u64::from(b[2]) << 16
        }
        crate::read::Endian::Big => {
            u64::from(b[0]) << 16 | u64::from(b[1]) << 8 | u64::from(b[2])
        }
    })
}

/// One named attribute on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'input> {
    pub at: DwAt,
    pub value: AttributeValue<'input>,
}

/// A debugging information entry.
///
/// Attributes keep their stream encounter order. Parent and children are
/// arena indices into the owning unit; the parent link is for traversal
/// only and carries no ownership.
#[derive(Debug, Clone)]
pub struct Die<'input> {
    pub(crate) offset: u64,
    pub(crate) tag: DwTag,
    pub(crate) has_children: bool,
    pub(crate) attrs: Vec<Attribute<'input>>,
    pub(crate) parent: Option<DieId>,
    pub(crate) children: Vec<DieId>,
}

impl<'input> Die<'input> {
    /// The entry's offset in the information section. Unique across the
    /// whole section and stable for the lifetime of a parsed file.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn tag(&self) -> DwTag {
        self.tag
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.has_children
    }

    /// The entry's attributes in encounter order.
    #[inline]
    pub fn attrs(&self) -> &[Attribute<'input>] {
        &self.attrs
    }

    #[inline]
    pub fn parent(&self) -> Option<DieId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[DieId] {
        &self.children
    }

    /// The value of the given attribute, if present.
    pub fn attr(&self, at: DwAt) -> Option<&AttributeValue<'input>> {
        self.attrs.iter().find(|a| a.at == at).map(|a| &a.value)
    }

    /// The raw value of `DW_AT_name`. Use `Dwarf::attr_string` to resolve
    /// indirect string forms.
    pub fn name(&self) -> Option<&AttributeValue<'input>> {
        self.attr(DW_AT_name)
    }

    /// The low program counter, if present as an address.
    pub fn low_pc(&self) -> Option<u64> {
        match self.attr(DW_AT_low_pc)? {
            AttributeValue::Address(addr) => Some(*addr),
            _ => None,
        }
    }

    /// The high program counter. A constant-class value is an offset from
    /// `low_pc`, an address-class value is absolute. `None` if the offset
    /// would wrap the address space.
    pub fn high_pc(&self, low_pc: u64) -> Option<u64> {
        match self.attr(DW_AT_high_pc)? {
            AttributeValue::Address(addr) => Some(*addr),
            value => value.udata().and_then(|size| low_pc.checked_add(size)),
        }
    }

    /// The raw value of `DW_AT_comp_dir`.
    pub fn comp_dir(&self) -> Option<&AttributeValue<'input>> {
        self.attr(DW_AT_comp_dir)
    }

    /// The source language of a unit root.
    pub fn language(&self) -> Option<DwLang> {
        self.attr(DW_AT_language)?
            .udata()
            .map(|code| DwLang(code as u16))
    }

    /// The offset of the unit's line number program.
    pub fn stmt_list(&self) -> Option<u64> {
        self.attr(DW_AT_stmt_list)?.sec_offset()
    }

    /// The offset of the unit's macro information.
    pub fn macro_info(&self) -> Option<u64> {
        self.attr(DW_AT_macro_info)?.sec_offset()
    }

    /// The value of `DW_AT_ranges`, either a section offset or an index.
    pub fn ranges(&self) -> Option<&AttributeValue<'input>> {
        self.attr(DW_AT_ranges)
    }

    /// The value of `DW_AT_location`, either an inline expression or a
    /// location list offset/index.
    pub fn location(&self) -> Option<&AttributeValue<'input>> {
        self.attr(DW_AT_location)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::read::{Endian, Reader};
    use crate::sections::SectionId;
    use crate::unit::Format;

    fn encoding(version: u16) -> Encoding {
        Encoding {
            format: Format::Dwarf32,
            version,
            address_size: 4,
        }
    }

    fn spec(form: DwForm) -> AttrSpec {
        AttrSpec {
            at: DW_AT_name,
            form,
            implicit_const: None,
        }
    }

    fn parse<'a>(data: &'a [u8], form: DwForm, version: u16) -> AttributeValue<'a> {
        let mut reader = Reader::new(data, Endian::Little, SectionId::DebugInfo);
        AttributeValue::parse(&mut reader, spec(form), encoding(version), 0).unwrap()
    }

    #[test]
    fn fixed_width_forms() {
        assert_eq!(parse(&[0x2a], DW_FORM_data1, 4), AttributeValue::Udata(42));
        assert_eq!(
            parse(&[1, 0, 0, 0], DW_FORM_addr, 4),
            AttributeValue::Address(1)
        );
        assert_eq!(
            parse(&[0x9b, 0xf1, 0x59], DW_FORM_sdata, 4),
            AttributeValue::Sdata(-624485)
        );
    }

    #[test]
    fn ref_addr_is_version_sensitive() {
        // 4-byte addresses, so identical width here, but version 2 reads
        // address class and later versions read offset class.
        let data = [0x10, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            parse(&data, DW_FORM_ref_addr, 2),
            AttributeValue::DebugInfoRef(0x10)
        );
        assert_eq!(
            parse(&data, DW_FORM_ref_addr, 4),
            AttributeValue::DebugInfoRef(0x10)
        );
    }

    #[test]
    fn blocks_and_exprs() {
        assert_eq!(
            parse(&[2, 0xaa, 0xbb], DW_FORM_block, 4),
            AttributeValue::Block(&[0xaa, 0xbb])
        );
        assert_eq!(
            parse(&[1, 0x9c], DW_FORM_exprloc, 4),
            AttributeValue::Exprloc(&[0x9c])
        );
    }

    #[test]
    fn implicit_const_reads_no_data() {
        let mut reader = Reader::new(&[], Endian::Little, SectionId::DebugInfo);
        let spec = AttrSpec {
            at: DW_AT_const_value,
            form: DW_FORM_implicit_const,
            implicit_const: Some(-7),
        };
        let value = AttributeValue::parse(&mut reader, spec, encoding(5), 0).unwrap();
        assert_eq!(value, AttributeValue::Sdata(-7));
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn unknown_form() {
        let mut reader = Reader::new(&[0u8; 8], Endian::Little, SectionId::DebugInfo);
        let err = AttributeValue::parse(&mut reader, spec(DwForm(0x7f)), encoding(4), 0x40)
            .unwrap_err();
        match err {
            crate::Error::UnsupportedForm { form, unit_offset } => {
                assert_eq!(form, DwForm(0x7f));
                assert_eq!(unit_offset, 0x40);
            }
            other => panic!("expected UnsupportedForm, got {:?}", other),
        }
    }

    #[test]
    fn high_pc_overflow_is_none() {
        let die = Die {
            offset: 0,
            tag: DW_TAG_subprogram,
            has_children: false,
            attrs: vec![Attribute {
                at: DW_AT_high_pc,
                value: AttributeValue::Udata(u64::MAX),
            }],
            parent: None,
            children: Vec::new(),
        };
        assert_eq!(die.high_pc(0), Some(u64::MAX));
        assert_eq!(die.high_pc(2), None);
    }

    #[test]
    fn indirect() {
        // ULEB form code for data2, then the value.
        let value = parse(&[0x05, 0x34, 0x12], DW_FORM_indirect, 4);
        assert_eq!(value, AttributeValue::Udata(0x1234));
    }
}
