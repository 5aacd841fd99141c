//! Endian-aware reading of section byte ranges.

use crate::sections::SectionId;
use crate::unit::Format;
use crate::{Error, Result};

/// The byte order of the container file.
///
/// Supplied by the section provider; never inferred from section contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Little
    }
}

impl Endian {
    #[inline]
    pub(crate) fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        }
    }

    #[inline]
    pub(crate) fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }
    }

    #[inline]
    pub(crate) fn u64(self, b: [u8; 8]) -> u64 {
        match self {
            Endian::Little => u64::from_le_bytes(b),
            Endian::Big => u64::from_be_bytes(b),
        }
    }
}

/// A cursor over one section's bytes.
///
/// The position is the absolute section-relative offset, so offsets read
/// from the data can be compared against `offset()` directly.
#[derive(Debug, Clone)]
pub struct Reader<'input> {
    data: &'input [u8],
    position: usize,
    endian: Endian,
    section: SectionId,
}

impl<'input> Reader<'input> {
    pub fn new(data: &'input [u8], endian: Endian, section: SectionId) -> Self {
        Reader {
            data,
            position: 0,
            endian,
            section,
        }
    }

    /// The current section-relative offset.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.position as u64
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    #[inline]
    pub fn section(&self) -> SectionId {
        self.section
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        (self.data.len() - self.position.min(self.data.len())) as u64
    }

    fn truncated(&self) -> Error {
        Error::TruncatedSection {
            section: self.section,
            offset: self.position as u64,
        }
    }

    /// Move the cursor to an absolute section offset.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.data.len() as u64 {
            return Err(Error::TruncatedSection {
                section: self.section,
                offset,
            });
        }
        self.position = offset as usize;
        Ok(())
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        let end = self
            .position
            .checked_add(count as usize)
            .ok_or_else(|| self.truncated())?;
        if end > self.data.len() {
            return Err(self.truncated());
        }
        self.position = end;
        Ok(())
    }

    /// Read `count` bytes as a borrowed slice.
    pub fn bytes(&mut self, count: u64) -> Result<&'input [u8]> {
        let end = self
            .position
            .checked_add(count as usize)
            .ok_or_else(|| self.truncated())?;
        if end > self.data.len() || count > usize::MAX as u64 {
            return Err(self.truncated());
        }
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8> {
        let b = self.bytes(1)?;
        Ok(b[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(self.endian.u16([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(self.endian.u32([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        Ok(self
            .endian
            .u64([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Read an address-sized unsigned value.
    pub fn address(&mut self, address_size: u8) -> Result<u64> {
        match address_size {
            1 => self.u8().map(u64::from),
            2 => self.u16().map(u64::from),
            4 => self.u32().map(u64::from),
            8 => self.u64(),
            _ => Err(Error::MalformedData(format!(
                "unsupported address size {}",
                address_size
            ))),
        }
    }

    /// Read a section offset whose width depends on the unit's format.
    pub fn offset_value(&mut self, format: Format) -> Result<u64> {
        match format {
            Format::Dwarf32 => self.u32().map(u64::from),
            Format::Dwarf64 => self.u64(),
        }
    }

    /// Read an initial length field, handling the 64-bit DWARF escape.
    pub fn initial_length(&mut self) -> Result<(u64, Format)> {
        let length = self.u32()?;
        if length == 0xffff_ffff {
            Ok((self.u64()?, Format::Dwarf64))
        } else if length >= 0xffff_fff0 {
            Err(Error::MalformedData(format!(
                "reserved initial length value {:#x}",
                length
            )))
        } else {
            Ok((u64::from(length), Format::Dwarf32))
        }
    }

    /// Read an unsigned LEB128 value.
    pub fn uleb128(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 {
                return Err(Error::MalformedData("ULEB128 value overflows u64".into()));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(Error::MalformedData("ULEB128 value too long".into()));
            }
        }
    }

    /// Read a signed LEB128 value.
    pub fn sleb128(&mut self) -> Result<i64> {
        let mut result = 0i64;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte != 0 && byte != 0x7f {
                return Err(Error::MalformedData("SLEB128 value overflows i64".into()));
            }
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    // Sign extend.
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
            if shift > 63 {
                return Err(Error::MalformedData("SLEB128 value too long".into()));
            }
        }
    }

    /// Read a null-terminated string, returning the bytes before the null.
    pub fn string(&mut self) -> Result<&'input [u8]> {
        let start = self.position;
        match self.data[start..].iter().position(|&b| b == 0) {
            Some(len) => {
                let bytes = &self.data[start..start + len];
                self.position = start + len + 1;
                Ok(bytes)
            }
            None => {
                self.position = self.data.len();
                Err(self.truncated())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reader(data: &[u8]) -> Reader {
        Reader::new(data, Endian::Little, SectionId::DebugInfo)
    }

    #[test]
    fn leb128() {
        let mut r = reader(&[0x7f, 0xe5, 0x8e, 0x26, 0x80, 0x01]);
        assert_eq!(r.uleb128().unwrap(), 0x7f);
        assert_eq!(r.uleb128().unwrap(), 624485);
        assert_eq!(r.uleb128().unwrap(), 128);
        assert!(r.uleb128().is_err());
    }

    #[test]
    fn sleb128_sign_extension() {
        let mut r = reader(&[0x7f, 0x3f, 0x40, 0x9b, 0xf1, 0x59]);
        assert_eq!(r.sleb128().unwrap(), -1);
        assert_eq!(r.sleb128().unwrap(), 63);
        assert_eq!(r.sleb128().unwrap(), -64);
        assert_eq!(r.sleb128().unwrap(), -624485);
    }

    #[test]
    fn overlong_leb128() {
        let mut r = reader(&[0x80; 11]);
        match r.uleb128() {
            Err(Error::MalformedData(_)) => {}
            other => panic!("expected MalformedData, got {:?}", other),
        }
    }

    #[test]
    fn truncated_read() {
        let mut r = reader(&[1, 2]);
        match r.u32() {
            Err(Error::TruncatedSection { section, .. }) => {
                assert_eq!(section, SectionId::DebugInfo);
            }
            other => panic!("expected TruncatedSection, got {:?}", other),
        }
    }

    #[test]
    fn initial_length_escape() {
        let mut r = reader(&[0xff, 0xff, 0xff, 0xff, 8, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(r.initial_length().unwrap(), (8, Format::Dwarf64));
    }

    #[test]
    fn strings() {
        let mut r = reader(b"one\0two\0");
        assert_eq!(r.string().unwrap(), b"one");
        assert_eq!(r.string().unwrap(), b"two");
    }
}
