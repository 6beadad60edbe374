use core::ops::Range;

use crate::constants::*;
use crate::ByteOrder;
use crate::Class;
use crate::ElfRead;
use crate::Error;
use crate::FileKind;
use crate::Machine;
use crate::OsAbi;

/// ELF header.
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Header {
    /// Bitness.
    pub class: Class,
    /// Data format.
    pub byte_order: ByteOrder,
    /// Operating system ABI.
    pub os_abi: OsAbi,
    /// ABI version
    pub abi_version: u8,
    /// File type.
    pub kind: FileKind,
    /// Architecture.
    pub machine: Machine,
    /// Architecture-specific flags.
    pub flags: u32,
    /// Program entry point.
    pub entry_point: u64,
    /// Program header (the list of segments) offset within the file.
    pub program_header_offset: u64,
    /// The length of each segment's metadata entry.
    pub segment_len: u16,
    /// The number of segments.
    pub num_segments: u16,
    /// Section header (the list of sections) offset within the file.
    pub section_header_offset: u64,
    /// The length of each section's metadata entry.
    pub section_len: u16,
    /// The number of sections.
    pub num_sections: u16,
    /// The index of the section in the section header that stores the names of sections.
    pub section_names_index: u16,
    /// The length of the ELF header.
    pub len: u16,
}

impl Header {
    /// Read header from `reader`.
    pub fn read<R: ElfRead>(reader: &mut R) -> Result<Self, Error> {
        let mut magic = [0_u8; MAGIC.len()];
        reader.read_bytes(&mut magic[..]).map_err(|e| match e {
            Error::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => Error::NotElf,
            e => e,
        })?;
        if magic != MAGIC {
            return Err(Error::NotElf);
        }
        let class: Class = reader.read_u8()?.try_into()?;
        let byte_order: ByteOrder = reader.read_u8()?.try_into()?;
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(Error::UnsupportedElf("identification version"));
        }
        let os_abi = reader.read_u8()?.into();
        let abi_version = reader.read_u8()?;
        reader.read_bytes(&mut [0_u8; 7])?;
        let kind: FileKind = reader.read_u16(byte_order)?.into();
        let machine = reader.read_u16(byte_order)?.into();
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(Error::UnsupportedElf("file version"));
        }
        reader.read_bytes(&mut [0_u8; 3])?;
        let entry_point = reader.read_word(class, byte_order)?;
        let program_header_offset = reader.read_word(class, byte_order)?;
        let section_header_offset = reader.read_word(class, byte_order)?;
        let flags = reader.read_u32(byte_order)?;
        let real_header_len = reader.read_u16(byte_order)?;
        let segment_len = reader.read_u16(byte_order)?;
        let num_segments = reader.read_u16(byte_order)?;
        let section_len = reader.read_u16(byte_order)?;
        let num_sections = reader.read_u16(byte_order)?;
        let section_names_index = reader.read_u16(byte_order)?;
        let ret = Self {
            class,
            byte_order,
            os_abi,
            abi_version,
            kind,
            machine,
            flags,
            entry_point,
            program_header_offset,
            segment_len,
            num_segments,
            section_header_offset,
            section_len,
            num_sections,
            section_names_index,
            len: real_header_len,
        };
        ret.check()?;
        Ok(ret)
    }

    /// Validate the header.
    pub fn check(&self) -> Result<(), Error> {
        if self.len != self.class.header_len() {
            return Err(Error::MalformedElf("header length"));
        }
        if self.section_len != 0 && self.section_len != self.class.section_len() {
            return Err(Error::MalformedElf("section entry length"));
        }
        if self.segment_len != 0 && self.segment_len != self.class.segment_len() {
            return Err(Error::MalformedElf("segment entry length"));
        }
        let segments_end = (self.segment_len as u64)
            .checked_mul(self.num_segments.into())
            .and_then(|n| n.checked_add(self.program_header_offset))
            .ok_or(Error::MalformedElf("program header size overflow"))?;
        let segments_range = self.program_header_offset..segments_end;
        let sections_end = (self.section_len as u64)
            .checked_mul(self.num_sections.into())
            .and_then(|n| n.checked_add(self.section_header_offset))
            .ok_or(Error::MalformedElf("section header size overflow"))?;
        let sections_range = self.section_header_offset..sections_end;
        if blocks_overlap(&segments_range, &sections_range) {
            return Err(Error::MalformedElf("segments and sections overlap"));
        }
        if self.section_names_index != 0
            && self.num_sections != 0
            && self.section_names_index > self.num_sections
        {
            return Err(Error::MalformedElf("section header string table index"));
        }
        Ok(())
    }

    /// The size in bytes of the program header (the list of segments).
    pub const fn program_header_len(&self) -> u64 {
        self.segment_len as u64 * self.num_segments as u64
    }

    /// The size in bytes of the section header (the list of sections).
    pub const fn section_header_len(&self) -> u64 {
        self.section_len as u64 * self.num_sections as u64
    }
}

/// Check that memory/file blocks don't overlap.
const fn blocks_overlap(a: &Range<u64>, b: &Range<u64>) -> bool {
    if a.start == a.end || b.start == b.end {
        return false;
    }
    if a.end == b.start || b.end == a.start {
        return false;
    }
    a.start < b.end && b.start < a.end
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn sample_header_bytes() -> Vec<u8> {
        let mut bytes = vec![0_u8; HEADER_LEN_64];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4] = Class::Elf64 as u8;
        bytes[5] = ByteOrder::LittleEndian as u8;
        bytes[6] = VERSION;
        bytes[7] = OsAbi::Gnu.as_u8();
        bytes[16..18].copy_from_slice(&FileKind::Shared.as_u16().to_le_bytes());
        bytes[18..20].copy_from_slice(&Machine::X86_64.as_u16().to_le_bytes());
        bytes[20] = VERSION;
        bytes[52..54].copy_from_slice(&(HEADER_LEN_64 as u16).to_le_bytes());
        bytes[54..56].copy_from_slice(&(SEGMENT_LEN_64 as u16).to_le_bytes());
        bytes[58..60].copy_from_slice(&(SECTION_LEN_64 as u16).to_le_bytes());
        bytes
    }

    #[test]
    fn reads_minimal_shared_object_header() {
        let bytes = sample_header_bytes();
        let header = Header::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.class, Class::Elf64);
        assert_eq!(header.kind, FileKind::Shared);
        assert_eq!(header.machine, Machine::X86_64);
        assert_eq!(header.num_segments, 0);
        assert_eq!(header.num_sections, 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_header_bytes();
        bytes[0] = 0;
        let err = Header::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::NotElf));
    }

    #[test]
    fn rejects_truncated_file() {
        let bytes = vec![0x7f, b'E', b'L'];
        let err = Header::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::NotElf));
    }
}
