//! The line number program: a register machine whose output is the
//! address-to-source-line table.

use std::borrow::Cow;

use crate::constants::*;
use crate::die::AttributeValue;
use crate::read::Reader;
use crate::sections::{SectionId, Sections};
use crate::unit::{Encoding, Format};
use crate::{Error, Result};

/// One source file named by a line program header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry<'input> {
    pub path: Cow<'input, str>,
    pub directory_index: u64,
    pub timestamp: u64,
    pub size: u64,
    pub md5: Option<[u8; 16]>,
}

/// The header of one unit's line number program.
#[derive(Debug, Clone)]
pub struct LineProgramHeader<'input> {
    /// The program's offset in the line number section.
    pub offset: u64,
    pub encoding: Encoding,
    pub header_length: u64,
    pub minimum_instruction_length: u8,
    pub maximum_operations_per_instruction: u8,
    pub default_is_stmt: bool,
    pub line_base: i8,
    pub line_range: u8,
    pub opcode_base: u8,
    /// Operand counts for standard opcodes 1 .. opcode_base.
    pub standard_opcode_lengths: Vec<u8>,
    pub include_directories: Vec<Cow<'input, str>>,
    pub file_names: Vec<FileEntry<'input>>,
}

impl<'input> LineProgramHeader<'input> {
    /// The file entry for a file register value, honoring the version's
    /// numbering: one-based before version 5, zero-based from version 5.
    pub fn file(&self, index: u64) -> Option<&FileEntry<'input>> {
        let index = if self.encoding.version >= 5 {
            index
        } else {
            index.checked_sub(1)?
        };
        self.file_names.get(index as usize)
    }
}

/// One row of the reconstructed line table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    pub op_index: u64,
    pub file: u64,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub basic_block: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub isa: u64,
    pub discriminator: u64,
    pub end_sequence: bool,
}

// The persistent registers of the state machine.
#[derive(Debug, Clone, Copy)]
struct Registers {
    address: u64,
    op_index: u64,
    file: u64,
    line: u64,
    column: u64,
    is_stmt: bool,
    basic_block: bool,
    prologue_end: bool,
    epilogue_begin: bool,
    isa: u64,
    discriminator: u64,
}

impl Registers {
    fn new(default_is_stmt: bool) -> Self {
        Registers {
            address: 0,
            op_index: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }

    fn row(&self, end_sequence: bool) -> LineRow {
        LineRow {
            address: self.address,
            op_index: self.op_index,
            file: self.file,
            line: self.line,
            column: self.column,
            is_stmt: self.is_stmt,
            basic_block: self.basic_block,
            prologue_end: self.prologue_end,
            epilogue_begin: self.epilogue_begin,
            isa: self.isa,
            discriminator: self.discriminator,
            end_sequence,
        }
    }
}

/// A unit's line number program: the decoded header plus the instruction
/// stream it governs.
#[derive(Debug, Clone)]
pub struct LineProgram<'input> {
    header: LineProgramHeader<'input>,
    program: Reader<'input>,
    /// Section offset one past the last instruction byte.
    program_end: u64,
}

impl<'input> LineProgram<'input> {
    /// Parse the program header at `offset` in the line number section.
    ///
    /// `unit_encoding` supplies the address size for versions whose line
    /// header does not carry its own.
    pub fn parse(
        sections: &Sections<'input>,
        offset: u64,
        unit_encoding: Encoding,
    ) -> Result<LineProgram<'input>> {
        let mut reader = sections.reader(SectionId::DebugLine, offset)?;
        let (unit_length, format) = reader.initial_length()?;
        let end = reader.offset().saturating_add(unit_length);
        if end > reader.len() {
            return Err(Error::MalformedData(format!(
                "line program at {:#x} declares length past the end of the section",
                offset
            )));
        }
        let version = reader.u16()?;
        if !(2..=5).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }
        let address_size = if version >= 5 {
            let address_size = reader.u8()?;
            let segment_selector_size = reader.u8()?;
            if segment_selector_size != 0 {
                return Err(Error::MalformedData(format!(
                    "unsupported segment selector size {}",
                    segment_selector_size
                )));
            }
            address_size
        } else {
            unit_encoding.address_size
        };
        let encoding = Encoding {
            format,
            version,
            address_size,
        };
        let header_length = reader.offset_value(format)?;
        let program_start = reader.offset().saturating_add(header_length);
        let minimum_instruction_length = reader.u8()?;
        let maximum_operations_per_instruction = if version >= 4 { reader.u8()? } else { 1 };
        if minimum_instruction_length == 0 || maximum_operations_per_instruction == 0 {
            return Err(Error::MalformedData(
                "line program header with zero instruction length parameters".into(),
            ));
        }
        let default_is_stmt = reader.u8()? != 0;
        let line_base = reader.u8()? as i8;
        let line_range = reader.u8()?;
        let opcode_base = reader.u8()?;
        if line_range == 0 || opcode_base == 0 {
            return Err(Error::MalformedData(
                "line program header with zero line_range or opcode_base".into(),
            ));
        }
        let mut standard_opcode_lengths = Vec::with_capacity(opcode_base as usize - 1);
        for _ in 1..opcode_base {
            standard_opcode_lengths.push(reader.u8()?);
        }

        let (include_directories, file_names) = if version >= 5 {
            let dirs = parse_entry_table(&mut reader, sections, encoding)?;
            let include_directories = dirs.into_iter().map(|e| e.path).collect();
            let file_names = parse_entry_table(&mut reader, sections, encoding)?;
            (include_directories, file_names)
        } else {
            let mut include_directories = Vec::new();
            loop {
                let dir = reader.string()?;
                if dir.is_empty() {
                    break;
                }
                include_directories.push(String::from_utf8_lossy(dir));
            }
            let mut file_names = Vec::new();
            loop {
                let name = reader.string()?;
                if name.is_empty() {
                    break;
                }
                file_names.push(parse_legacy_file_entry(&mut reader, name)?);
            }
            (include_directories, file_names)
        };

        if reader.offset() > program_start {
            return Err(Error::MalformedData(format!(
                "line program header at {:#x} overruns its declared length",
                offset
            )));
        }

        let mut program = reader;
        program.seek(program_start)?;

        Ok(LineProgram {
            header: LineProgramHeader {
                offset,
                encoding,
                header_length,
                minimum_instruction_length,
                maximum_operations_per_instruction,
                default_is_stmt,
                line_base,
                line_range,
                opcode_base,
                standard_opcode_lengths,
                include_directories,
                file_names,
            },
            program,
            program_end: end,
        })
    }

    #[inline]
    pub fn header(&self) -> &LineProgramHeader<'input> {
        &self.header
    }

    /// Run the state machine and emit the row sequence.
    ///
    /// Rows are append-only; an end-sequence row closes each sequence and
    /// resets the registers, so one program may yield several sequences.
    /// `DW_LNE_define_file` entries are appended to the header's file
    /// table as they are encountered.
    pub fn rows(&mut self) -> Result<Vec<LineRow>> {
        let header_end = self.program_end;
        let params = OpcodeParams {
            minimum_instruction_length: self.header.minimum_instruction_length,
            maximum_operations_per_instruction: self.header.maximum_operations_per_instruction,
            line_base: self.header.line_base,
            line_range: self.header.line_range,
            opcode_base: self.header.opcode_base,
        };
        let address_size = self.header.encoding.address_size;
        let standard_opcode_lengths = self.header.standard_opcode_lengths.clone();
        let default_is_stmt = self.header.default_is_stmt;
        let mut reader = self.program.clone();
        let mut regs = Registers::new(default_is_stmt);
        let mut rows = Vec::new();

        while reader.offset() < header_end {
            let opcode = reader.u8()?;
            if opcode >= params.opcode_base {
                // Special opcode: advance address and line together, then
                // emit a row.
                let adjusted = u64::from(opcode - params.opcode_base);
                advance_pc(&params, &mut regs, adjusted / u64::from(params.line_range));
                let line_advance =
                    i64::from(params.line_base) + (adjusted % u64::from(params.line_range)) as i64;
                regs.line = regs.line.wrapping_add(line_advance as u64);
                rows.push(regs.row(false));
                regs.basic_block = false;
                regs.prologue_end = false;
                regs.epilogue_begin = false;
                regs.discriminator = 0;
            } else if opcode == 0 {
                // Extended opcode: length-prefixed payload.
                let length = reader.uleb128()?;
                let payload = reader.bytes(length)?;
                let mut ext = Reader::new(payload, reader.endian(), reader.section());
                if length == 0 {
                    return Err(Error::MalformedData(
                        "extended line opcode with empty payload".into(),
                    ));
                }
                match DwLne(ext.u8()?) {
                    DW_LNE_end_sequence => {
                        regs.end_of_sequence(&mut rows);
                        regs = Registers::new(default_is_stmt);
                    }
                    DW_LNE_set_address => {
                        regs.address = ext.address(address_size)?;
                        regs.op_index = 0;
                    }
                    DW_LNE_define_file => {
                        let name = ext.string()?;
                        let entry = parse_legacy_file_entry(&mut ext, name)?;
                        self.header.file_names.push(entry);
                    }
                    DW_LNE_set_discriminator => {
                        regs.discriminator = ext.uleb128()?;
                    }
                    unknown => {
                        // Skipped via the declared payload length; forward
                        // compatible with vendor extensions.
                        debug!("skipping unknown extended line opcode {:#x}", unknown.0);
                    }
                }
            } else {
                match DwLns(opcode) {
                    DW_LNS_copy => {
                        rows.push(regs.row(false));
                        regs.basic_block = false;
                        regs.prologue_end = false;
                        regs.epilogue_begin = false;
                        regs.discriminator = 0;
                    }
                    DW_LNS_advance_pc => {
                        let advance = reader.uleb128()?;
                        advance_pc(&params, &mut regs, advance);
                    }
                    DW_LNS_advance_line => {
                        let advance = reader.sleb128()?;
                        regs.line = regs.line.wrapping_add(advance as u64);
                    }
                    DW_LNS_set_file => {
                        regs.file = reader.uleb128()?;
                    }
                    DW_LNS_set_column => {
                        regs.column = reader.uleb128()?;
                    }
                    DW_LNS_negate_stmt => {
                        regs.is_stmt = !regs.is_stmt;
                    }
                    DW_LNS_set_basic_block => {
                        regs.basic_block = true;
                    }
                    DW_LNS_const_add_pc => {
                        // Advance as if by special opcode 255, without
                        // emitting a row or touching the line register.
                        let adjusted = u64::from(255 - params.opcode_base);
                        advance_pc(&params, &mut regs, adjusted / u64::from(params.line_range));
                    }
                    DW_LNS_fixed_advance_pc => {
                        // The one standard opcode with a fixed-width
                        // operand; no instruction-length scaling.
                        regs.address = regs.address.saturating_add(u64::from(reader.u16()?));
                        regs.op_index = 0;
                    }
                    DW_LNS_set_prologue_end => {
                        regs.prologue_end = true;
                    }
                    DW_LNS_set_epilogue_begin => {
                        regs.epilogue_begin = true;
                    }
                    DW_LNS_set_isa => {
                        regs.isa = reader.uleb128()?;
                    }
                    unknown => {
                        // Below opcode_base but not a known standard
                        // opcode: skip its declared ULEB operands.
                        let operands = standard_opcode_lengths
                            .get(opcode as usize - 1)
                            .copied()
                            .unwrap_or(0);
                        debug!(
                            "skipping unknown standard line opcode {:#x} with {} operands",
                            unknown.0, operands
                        );
                        for _ in 0..operands {
                            reader.uleb128()?;
                        }
                    }
                }
            }
        }
        Ok(rows)
    }

}

impl Registers {
    fn end_of_sequence(&mut self, rows: &mut Vec<LineRow>) {
        rows.push(self.row(true));
    }
}

// The header parameters the opcode arithmetic needs.
#[derive(Debug, Clone, Copy)]
struct OpcodeParams {
    minimum_instruction_length: u8,
    maximum_operations_per_instruction: u8,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
}

fn advance_pc(params: &OpcodeParams, regs: &mut Registers, operation_advance: u64) {
    let max_ops = u64::from(params.maximum_operations_per_instruction);
    let advanced = regs.op_index.saturating_add(operation_advance);
    regs.address = regs.address.saturating_add(
        u64::from(params.minimum_instruction_length).saturating_mul(advanced / max_ops),
    );
    regs.op_index = advanced % max_ops;
}

fn parse_legacy_file_entry<'input>(
    reader: &mut Reader<'input>,
    name: &'input [u8],
) -> Result<FileEntry<'input>> {
    let directory_index = reader.uleb128()?;
    let timestamp = reader.uleb128()?;
    let size = reader.uleb128()?;
    Ok(FileEntry {
        path: String::from_utf8_lossy(name),
        directory_index,
        timestamp,
        size,
        md5: None,
    })
}

// Parse one version 5 format-described entry table (directories or files).
fn parse_entry_table<'input>(
    reader: &mut Reader<'input>,
    sections: &Sections<'input>,
    encoding: Encoding,
) -> Result<Vec<FileEntry<'input>>> {
    let format_count = reader.u8()?;
    let mut formats = Vec::with_capacity(format_count as usize);
    for _ in 0..format_count {
        let content_type = DwLnct(reader.uleb128()? as u16);
        let form = DwForm(reader.uleb128()? as u16);
        formats.push((content_type, form));
    }
    let count = reader.uleb128()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut entry = FileEntry {
            path: Cow::Borrowed(""),
            directory_index: 0,
            timestamp: 0,
            size: 0,
            md5: None,
        };
        for &(content_type, form) in &formats {
            let spec = crate::abbrev::AttrSpec {
                at: DwAt(0),
                form,
                implicit_const: None,
            };
            let value = AttributeValue::parse(reader, spec, encoding, 0)?;
            match content_type {
                DW_LNCT_path => {
                    entry.path = entry_table_string(sections, &value)?;
                }
                DW_LNCT_directory_index => {
                    entry.directory_index = value.udata().ok_or_else(|| {
                        Error::MalformedData("non-constant directory index".into())
                    })?;
                }
                DW_LNCT_timestamp => {
                    entry.timestamp = value.udata().unwrap_or(0);
                }
                DW_LNCT_size => {
                    entry.size = value.udata().unwrap_or(0);
                }
                DW_LNCT_MD5 => {
                    if let AttributeValue::Data16(md5) = value {
                        entry.md5 = Some(md5);
                    }
                }
                other => {
                    debug!("ignoring line header content type {:#x}", other.0);
                }
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn entry_table_string<'input>(
    sections: &Sections<'input>,
    value: &AttributeValue<'input>,
) -> Result<Cow<'input, str>> {
    let bytes = match *value {
        AttributeValue::String(bytes) => bytes,
        AttributeValue::StrRef(offset) => {
            let mut reader = sections.reader(SectionId::DebugStr, offset)?;
            reader.string()?
        }
        AttributeValue::LineStrRef(offset) => {
            let mut reader = sections.reader(SectionId::DebugLineStr, offset)?;
            reader.string()?
        }
        _ => {
            return Err(Error::MalformedData(
                "line header path with a non-string form".into(),
            ));
        }
    };
    Ok(String::from_utf8_lossy(bytes))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::read::Endian;

    // Build a version 2 line program section around the given instruction
    // stream. 4-byte addresses, min_inst_len 1, line_base -5, line_range
    // 14, opcode_base as given.
    fn v2_section(opcode_base: u8, extra_std_lengths: &[u8], program: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        header.push(1); // minimum_instruction_length
        header.push(1); // default_is_stmt
        header.push(0xfb); // line_base = -5
        header.push(14); // line_range
        header.push(opcode_base);
        let mut std_lengths = vec![0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];
        std_lengths.extend_from_slice(extra_std_lengths);
        std_lengths.truncate(opcode_base as usize - 1);
        header.extend_from_slice(&std_lengths);
        header.push(0); // end of include directories
        header.extend_from_slice(b"a.c\0");
        header.extend_from_slice(&[0, 0, 0]); // dir, mtime, size
        header.push(0); // end of file names

        let mut section = Vec::new();
        let unit_length = 2 + 4 + header.len() + program.len();
        section.extend_from_slice(&(unit_length as u32).to_le_bytes());
        section.extend_from_slice(&2u16.to_le_bytes()); // version
        section.extend_from_slice(&(header.len() as u32).to_le_bytes());
        section.extend_from_slice(&header);
        section.extend_from_slice(program);
        section
    }

    fn unit_encoding() -> Encoding {
        Encoding {
            format: Format::Dwarf32,
            version: 4,
            address_size: 4,
        }
    }

    fn parse_rows(section: &[u8]) -> (LineProgram, Vec<LineRow>) {
        let mut sections = Sections::new(Endian::Little);
        sections.debug_line = section;
        let mut program = LineProgram::parse(&sections, 0, unit_encoding()).unwrap();
        let rows = program.rows().unwrap();
        (program, rows)
    }

    #[test]
    fn monotone_special_opcodes() {
        // set_address 0x1000; special(+0 addr, +0 line); special(+1, +1);
        // advance_pc 2; end_sequence.
        let program = [
            0x00, 5, 0x02, 0x00, 0x10, 0x00, 0x00, // DW_LNE_set_address
            18,   // special: addr += 0, line += 0
            33,   // special: addr += 1, line += 1
            0x02, 2, // DW_LNS_advance_pc 2
            0x00, 1, 0x01, // DW_LNE_end_sequence
        ];
        let section = v2_section(13, &[], &program);
        let (prog, rows) = parse_rows(&section);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].address, 0x1000);
        assert_eq!(rows[0].line, 1);
        assert_eq!(rows[0].file, 1);
        assert!(rows[0].is_stmt);
        assert_eq!(rows[1].address, 0x1001);
        assert_eq!(rows[1].line, 2);
        assert!(rows[2].end_sequence);
        assert_eq!(rows[2].address, 0x1003);
        for pair in rows.windows(2) {
            assert!(pair[0].address <= pair[1].address);
        }
        assert_eq!(prog.header().file(1).unwrap().path, "a.c");
    }

    #[test]
    fn standard_opcodes() {
        // negate_stmt; set_file 1; set_column 7; copy; fixed_advance_pc
        // 0x20; const_add_pc; copy; end_sequence.
        let program = [
            0x06, // negate_stmt
            0x04, 1, // set_file
            0x05, 7, // set_column
            0x01, // copy
            0x09, 0x20, 0x00, // fixed_advance_pc 0x20
            0x08, // const_add_pc: (255 - 13) / 14 = 17
            0x01, // copy
            0x00, 1, 0x01, // end_sequence
        ];
        let section = v2_section(13, &[], &program);
        let (_, rows) = parse_rows(&section);
        assert_eq!(rows.len(), 3);
        assert!(!rows[0].is_stmt);
        assert_eq!(rows[0].column, 7);
        assert_eq!(rows[0].address, 0);
        assert_eq!(rows[1].address, 0x20 + 17);
        assert!(rows[2].end_sequence);
    }

    #[test]
    fn unknown_opcodes_are_skipped() {
        // opcode_base 14: opcode 13 is an undeclared standard opcode with
        // one ULEB operand; also an unknown extended opcode 0x80.
        let program = [
            13, 0x85, 0x02, // unknown standard opcode, one ULEB operand
            0x00, 3, 0x80, 0xaa, 0xbb, // unknown extended opcode
            0x01, // copy
            0x00, 1, 0x01, // end_sequence
        ];
        let section = v2_section(14, &[1], &program);
        let (_, rows) = parse_rows(&section);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].end_sequence);
    }

    #[test]
    fn multiple_sequences_reset_state() {
        let program = [
            0x00, 5, 0x02, 0x00, 0x20, 0x00, 0x00, // set_address 0x2000
            0x03, 0x05, // advance_line +5
            0x01, // copy
            0x00, 1, 0x01, // end_sequence
            0x00, 5, 0x02, 0x00, 0x10, 0x00, 0x00, // set_address 0x1000
            0x01, // copy
            0x00, 1, 0x01, // end_sequence
        ];
        let section = v2_section(13, &[], &program);
        let (_, rows) = parse_rows(&section);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].line, 6);
        assert!(rows[1].end_sequence);
        // Registers reset between sequences; the second sequence may start
        // at a lower address.
        assert_eq!(rows[2].address, 0x1000);
        assert_eq!(rows[2].line, 1);
    }

    #[test]
    fn v5_file_table() {
        let mut header = Vec::new();
        header.push(1); // minimum_instruction_length
        header.push(1); // maximum_operations_per_instruction
        header.push(1); // default_is_stmt
        header.push(0xfb); // line_base
        header.push(14); // line_range
        header.push(13); // opcode_base
        header.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
        // Directory table: one format pair (path, string); one entry.
        header.push(1);
        header.extend_from_slice(&[0x01, 0x08]); // DW_LNCT_path, DW_FORM_string
        header.push(1);
        header.extend_from_slice(b"/src\0");
        // File table: (path, string) and (directory_index, udata).
        header.push(2);
        header.extend_from_slice(&[0x01, 0x08, 0x02, 0x0f]);
        header.push(1);
        header.extend_from_slice(b"main.c\0");
        header.push(0); // directory index

        let program = [0x00u8, 1, 0x01]; // end_sequence

        let mut section = Vec::new();
        let unit_length = 2 + 1 + 1 + 4 + header.len() + program.len();
        section.extend_from_slice(&(unit_length as u32).to_le_bytes());
        section.extend_from_slice(&5u16.to_le_bytes()); // version
        section.push(8); // address_size
        section.push(0); // segment_selector_size
        section.extend_from_slice(&(header.len() as u32).to_le_bytes());
        section.extend_from_slice(&header);
        section.extend_from_slice(&program);

        let mut sections = Sections::new(Endian::Little);
        sections.debug_line = &section;
        let program = LineProgram::parse(&sections, 0, unit_encoding()).unwrap();
        let header = program.header();
        assert_eq!(header.encoding.version, 5);
        assert_eq!(header.encoding.address_size, 8);
        assert_eq!(header.include_directories, vec![Cow::Borrowed("/src")]);
        // Version 5 file numbering is zero-based.
        let file = header.file(0).unwrap();
        assert_eq!(file.path, "main.c");
        assert_eq!(file.directory_index, 0);
    }
}
