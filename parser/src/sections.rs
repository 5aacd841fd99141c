//! The boundary between the decoding engine and the section provider.
//!
//! The engine never touches the container format. Whatever supplies the
//! bytes (an ELF/Mach-O reader, a test harness) fills in a [`Sections`]
//! with already-relocated, borrowed byte ranges.

use crate::read::{Endian, Reader};
use crate::{Error, Result};

/// Identifies a well-known debug section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionId {
    DebugInfo,
    DebugAbbrev,
    DebugStr,
    DebugLineStr,
    DebugStrOffsets,
    DebugAddr,
    DebugLine,
    DebugLoc,
    DebugLocLists,
    DebugRanges,
    DebugRngLists,
    DebugMacinfo,
}

impl SectionId {
    /// The conventional section name in ELF containers.
    pub fn name(self) -> &'static str {
        match self {
            SectionId::DebugInfo => ".debug_info",
            SectionId::DebugAbbrev => ".debug_abbrev",
            SectionId::DebugStr => ".debug_str",
            SectionId::DebugLineStr => ".debug_line_str",
            SectionId::DebugStrOffsets => ".debug_str_offsets",
            SectionId::DebugAddr => ".debug_addr",
            SectionId::DebugLine => ".debug_line",
            SectionId::DebugLoc => ".debug_loc",
            SectionId::DebugLocLists => ".debug_loclists",
            SectionId::DebugRanges => ".debug_ranges",
            SectionId::DebugRngLists => ".debug_rnglists",
            SectionId::DebugMacinfo => ".debug_macinfo",
        }
    }

    /// All section ids the engine may request from a provider.
    pub fn all() -> &'static [SectionId] {
        &[
            SectionId::DebugInfo,
            SectionId::DebugAbbrev,
            SectionId::DebugStr,
            SectionId::DebugLineStr,
            SectionId::DebugStrOffsets,
            SectionId::DebugAddr,
            SectionId::DebugLine,
            SectionId::DebugLoc,
            SectionId::DebugLocLists,
            SectionId::DebugRanges,
            SectionId::DebugRngLists,
            SectionId::DebugMacinfo,
        ]
    }
}

/// The debug sections of one file, borrowed from the section provider.
///
/// Missing sections read as empty. The byte ranges must stay valid for the
/// lifetime of the engine built on top of them.
#[derive(Debug, Default, Clone)]
pub struct Sections<'input> {
    pub endian: Endian,
    pub debug_info: &'input [u8],
    pub debug_abbrev: &'input [u8],
    pub debug_str: &'input [u8],
    pub debug_line_str: &'input [u8],
    pub debug_str_offsets: &'input [u8],
    pub debug_addr: &'input [u8],
    pub debug_line: &'input [u8],
    pub debug_loc: &'input [u8],
    pub debug_loclists: &'input [u8],
    pub debug_ranges: &'input [u8],
    pub debug_rnglists: &'input [u8],
    pub debug_macinfo: &'input [u8],
}

impl<'input> Sections<'input> {
    pub fn new(endian: Endian) -> Self {
        Sections {
            endian,
            ..Default::default()
        }
    }

    /// The raw bytes of a section; empty if the provider had none.
    pub fn data(&self, id: SectionId) -> &'input [u8] {
        match id {
            SectionId::DebugInfo => self.debug_info,
            SectionId::DebugAbbrev => self.debug_abbrev,
            SectionId::DebugStr => self.debug_str,
            SectionId::DebugLineStr => self.debug_line_str,
            SectionId::DebugStrOffsets => self.debug_str_offsets,
            SectionId::DebugAddr => self.debug_addr,
            SectionId::DebugLine => self.debug_line,
            SectionId::DebugLoc => self.debug_loc,
            SectionId::DebugLocLists => self.debug_loclists,
            SectionId::DebugRanges => self.debug_ranges,
            SectionId::DebugRngLists => self.debug_rnglists,
            SectionId::DebugMacinfo => self.debug_macinfo,
        }
    }

    /// Set a section's bytes by id.
    pub fn set(&mut self, id: SectionId, data: &'input [u8]) {
        match id {
            SectionId::DebugInfo => self.debug_info = data,
            SectionId::DebugAbbrev => self.debug_abbrev = data,
            SectionId::DebugStr => self.debug_str = data,
            SectionId::DebugLineStr => self.debug_line_str = data,
            SectionId::DebugStrOffsets => self.debug_str_offsets = data,
            SectionId::DebugAddr => self.debug_addr = data,
            SectionId::DebugLine => self.debug_line = data,
            SectionId::DebugLoc => self.debug_loc = data,
            SectionId::DebugLocLists => self.debug_loclists = data,
            SectionId::DebugRanges => self.debug_ranges = data,
            SectionId::DebugRngLists => self.debug_rnglists = data,
            SectionId::DebugMacinfo => self.debug_macinfo = data,
        }
    }

    /// A reader positioned at `offset` within the given section.
    pub fn reader(&self, id: SectionId, offset: u64) -> Result<Reader<'input>> {
        let data = self.data(id);
        if offset > data.len() as u64 {
            return Err(Error::TruncatedSection {
                section: id,
                offset,
            });
        }
        let mut reader = Reader::new(data, self.endian, id);
        reader.seek(offset)?;
        Ok(reader)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_section_is_empty() {
        let sections = Sections::new(Endian::Little);
        assert!(sections.data(SectionId::DebugLoc).is_empty());
        assert!(sections.reader(SectionId::DebugLoc, 1).is_err());
        assert!(sections.reader(SectionId::DebugLoc, 0).is_ok());
    }

    #[test]
    fn section_names() {
        assert_eq!(SectionId::DebugRngLists.name(), ".debug_rnglists");
        assert_eq!(SectionId::all().len(), 12);
    }
}
