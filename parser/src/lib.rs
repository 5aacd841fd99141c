//! A decoder for DWARF debugging information.
//!
//! This crate reads the debug sections of object and executable files and
//! materializes the compilation unit trees, attribute values, line number
//! tables, and location/range lists they contain. It is strictly read-only:
//! nothing here re-encodes debug information or evaluates location
//! expressions.
//!
//! The decoding engine consumes borrowed section byte ranges via
//! [`Sections`]; [`File::parse`] is a convenience front end that maps an
//! object file and gathers those ranges itself.

#[macro_use]
extern crate log;

mod abbrev;
mod constants;
mod die;
mod file;
mod line;
mod location;
mod range;
mod read;
mod sections;
mod unit;

pub use crate::abbrev::{Abbrev, AbbrevCache, AbbrevTable, AttrSpec};
pub use crate::constants::*;
pub use crate::die::{Attribute, AttributeValue, Die, DieId};
pub use crate::file::File;
pub use crate::line::{LineProgram, LineProgramHeader, LineRow};
pub use crate::location::{LocationList, LocationListEntry};
pub use crate::range::{Range, RangeList};
pub use crate::read::{Endian, Reader};
pub use crate::sections::{SectionId, Sections};
pub use crate::unit::{Dwarf, Encoding, Format, Unit, UnitHeader, UnitType};

use std::error;
use std::fmt;
use std::io;
use std::result;

/// A decoding error.
///
/// Failures while decoding one attribute or one unit are recovery
/// boundaries: they are recorded and decoding continues with the next
/// independent structure, so most of these are observed attached to a
/// [`Unit`] rather than aborting a whole parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Structurally invalid bytes: a bad terminator, a bad length prefix,
    /// or a stream that does not end where its header said it would.
    MalformedData(String),
    /// A read would have passed the end of a section.
    TruncatedSection {
        /// The section being read.
        section: SectionId,
        /// The section-relative offset of the failed read.
        offset: u64,
    },
    /// A recognized attribute slot used a form code this decoder does not
    /// implement.
    UnsupportedForm {
        /// The form code.
        form: DwForm,
        /// The offset of the owning unit in the information section.
        unit_offset: u64,
    },
    /// A unit header declared a version outside the supported 2..=5 range.
    UnsupportedVersion(u16),
    /// A reference attribute's computed offset does not land on a known
    /// entry boundary.
    UnresolvedReference {
        /// The computed information-section offset.
        offset: u64,
    },
    /// An abbreviation code with no declaration in the unit's table.
    InvalidAbbrevCode {
        /// The code read from the entry stream.
        code: u64,
        /// The offset of the owning unit in the information section.
        unit_offset: u64,
    },
    /// An I/O or container-format failure in the file front end.
    Io(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedData(msg) => write!(f, "malformed data: {}", msg),
            Error::TruncatedSection { section, offset } => {
                write!(f, "truncated read in {} at offset {:#x}", section.name(), offset)
            }
            Error::UnsupportedForm { form, unit_offset } => {
                write!(f, "unsupported form {} in unit at {:#x}", form, unit_offset)
            }
            Error::UnsupportedVersion(version) => {
                write!(f, "unsupported DWARF version {}", version)
            }
            Error::UnresolvedReference { offset } => {
                write!(f, "reference to {:#x} does not match any entry", offset)
            }
            Error::InvalidAbbrevCode { code, unit_offset } => {
                write!(f, "invalid abbreviation code {} in unit at {:#x}", code, unit_offset)
            }
            Error::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e.to_string())
    }
}

impl From<object::Error> for Error {
    fn from(e: object::Error) -> Error {
        Error::Io(format!("object parse error: {}", e))
    }
}

pub type Result<T> = result::Result<T, Error>;
