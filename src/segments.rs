use core::ops::Deref;
use core::ops::Range;

use crate::BlockRead;
use crate::ByteOrder;
use crate::Class;
use crate::ElfRead;
use crate::ElfSeek;
use crate::EntityIo;
use crate::Error;
use crate::SegmentFlags;
use crate::SegmentKind;

/// Program header: the list of segments.
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct ProgramHeader {
    entries: Vec<Segment>,
}

impl BlockRead for ProgramHeader {
    fn read<R: ElfRead>(
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
        len: u64,
    ) -> Result<Self, Error> {
        let num_segments = len / class.segment_len() as u64;
        let mut entries = Vec::with_capacity(num_segments as usize);
        for _ in 0..num_segments {
            let entry = Segment::read(reader, class, byte_order)?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }
}

impl Deref for ProgramHeader {
    type Target = Vec<Segment>;
    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

/// Segment.
///
/// The dynamic loader maps segments into the virtual address space of a program.
/// Usually segments consist of [sections](crate::Section), however, some segment
/// types exist on their own, e.g. [`Interpreter`](SegmentKind::Interpreter).
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Segment {
    /// Segment type.
    pub kind: SegmentKind,
    /// Flags.
    pub flags: SegmentFlags,
    /// In-file offset.
    pub offset: u64,
    /// Virtual address (in-memory offset).
    pub virtual_address: u64,
    /// Physical address (in-memory offset).
    pub physical_address: u64,
    /// In-file size.
    pub file_size: u64,
    /// In-memory size.
    pub memory_size: u64,
    /// Alignment.
    pub align: u64,
}

impl EntityIo for Segment {
    fn read<R: ElfRead>(
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
    ) -> Result<Self, Error> {
        let kind: SegmentKind = reader.read_u32(byte_order)?.into();
        let mut flags = 0;
        if class == Class::Elf64 {
            flags = reader.read_u32(byte_order)?;
        }
        let offset = reader.read_word(class, byte_order)?;
        let virtual_address = reader.read_word(class, byte_order)?;
        let physical_address = reader.read_word(class, byte_order)?;
        let file_size = reader.read_word(class, byte_order)?;
        let memory_size = reader.read_word(class, byte_order)?;
        if class == Class::Elf32 {
            flags = reader.read_u32(byte_order)?;
        }
        let align = reader.read_word(class, byte_order)?;
        Ok(Self {
            kind,
            flags: SegmentFlags::from_bits_retain(flags),
            offset,
            virtual_address,
            physical_address,
            file_size,
            memory_size,
            align,
        })
    }
}

impl Segment {
    /// Read the segment's raw content from `reader`.
    pub fn read_content<R: ElfRead + ElfSeek>(&self, reader: &mut R) -> Result<Vec<u8>, Error> {
        reader.seek(self.offset)?;
        let n: usize = self
            .file_size
            .try_into()
            .map_err(|_| Error::MalformedElf("segment file size too large"))?;
        let mut buf = vec![0_u8; n];
        reader.read_bytes(&mut buf[..])?;
        Ok(buf)
    }

    /// Virtual address range.
    pub const fn virtual_address_range(&self) -> Range<u64> {
        let start = self.virtual_address;
        let end = start + self.memory_size;
        start..end
    }

    /// In-file location of the segment.
    pub const fn file_offset_range(&self) -> Range<u64> {
        let start = self.offset;
        let end = start + self.file_size;
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_interp_segment() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(SegmentKind::Interpreter.as_u32()).to_le_bytes());
        bytes.extend_from_slice(&SegmentFlags::READABLE.bits().to_le_bytes());
        bytes.extend_from_slice(&0x1c0_u64.to_le_bytes()); // offset
        bytes.extend_from_slice(&0x1c0_u64.to_le_bytes()); // vaddr
        bytes.extend_from_slice(&0x1c0_u64.to_le_bytes()); // paddr
        bytes.extend_from_slice(&28_u64.to_le_bytes()); // file size
        bytes.extend_from_slice(&28_u64.to_le_bytes()); // mem size
        bytes.extend_from_slice(&1_u64.to_le_bytes()); // align
        let segment =
            Segment::read(&mut Cursor::new(bytes), Class::Elf64, ByteOrder::LittleEndian).unwrap();
        assert_eq!(segment.kind, SegmentKind::Interpreter);
        assert_eq!(segment.offset, 0x1c0);
        assert_eq!(segment.file_size, 28);
    }
}
