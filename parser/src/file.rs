//! Convenience front end that maps an object file and feeds its debug
//! sections to the engine.

use std::fs;

use memmap2::Mmap;
use object::{Object, ObjectSection};

use crate::read::Endian;
use crate::sections::{SectionId, Sections};
use crate::unit::Dwarf;
use crate::{Error, Result};

pub struct File;

impl File {
    /// Map the file at `path`, gather its debug sections, decode them, and
    /// hand the engine to the callback.
    ///
    /// The callback shape keeps the borrowed section bytes alive exactly
    /// as long as the engine that reads them.
    pub fn parse<Cb>(path: &str, cb: Cb) -> Result<()>
    where
        Cb: FnOnce(&Dwarf) -> Result<()>,
    {
        let handle = match fs::File::open(path) {
            Ok(handle) => handle,
            Err(e) => {
                return Err(Error::Io(format!("open failed: {}", e)));
            }
        };

        let map = match unsafe { Mmap::map(&handle) } {
            Ok(map) => map,
            Err(e) => {
                return Err(Error::Io(format!("memmap failed: {}", e)));
            }
        };

        File::parse_object(&map, cb)
    }

    fn parse_object<Cb>(input: &[u8], cb: Cb) -> Result<()>
    where
        Cb: FnOnce(&Dwarf) -> Result<()>,
    {
        let object = object::File::parse(input)?;

        let endian = if object.is_little_endian() {
            Endian::Little
        } else {
            Endian::Big
        };

        let mut sections = Sections::new(endian);
        for &id in SectionId::all() {
            if let Some(section) = object.section_by_name(id.name()) {
                match section.data() {
                    Ok(data) => sections.set(id, data),
                    Err(e) => {
                        debug!("ignoring unreadable section {}: {}", id.name(), e);
                    }
                }
            }
        }

        let dwarf = Dwarf::parse(sections);
        cb(&dwarf)
    }
}
