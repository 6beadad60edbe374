use core::ops::Deref;
use core::ops::Range;

use crate::BlockRead;
use crate::ByteOrder;
use crate::Class;
use crate::ElfRead;
use crate::ElfSeek;
use crate::EntityIo;
use crate::Error;
use crate::SectionKind;

/// Section header: the list of sections.
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct SectionHeader {
    entries: Vec<Section>,
}

impl BlockRead for SectionHeader {
    fn read<R: ElfRead>(
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
        len: u64,
    ) -> Result<Self, Error> {
        let num_sections = len / class.section_len() as u64;
        let mut entries = Vec::with_capacity(num_sections as usize);
        for _ in 0..num_sections {
            let entry = Section::read(reader, class, byte_order)?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }
}

impl SectionHeader {
    /// Find the first section with the given name, resolved through `shstrtab`.
    pub fn find_by_name(&self, shstrtab: &crate::StringTable, name: &core::ffi::CStr) -> Option<&Section> {
        self.entries
            .iter()
            .find(|section| shstrtab.get(section.name_offset) == Some(name))
    }

    /// Find the first section of the given type.
    pub fn find_by_kind(&self, kind: SectionKind) -> Option<&Section> {
        self.entries.iter().find(|section| section.kind == kind)
    }
}

impl Deref for SectionHeader {
    type Target = Vec<Section>;
    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

/// Section.
///
/// Dynamic loader maps sections into virtual address space of a program as part of segments.
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Section {
    /// Offset of the section name in the section that stores section names.
    pub name_offset: u32,
    /// Section type.
    pub kind: SectionKind,
    /// Section flags, raw.
    pub flags: u64,
    /// Virtual address (in-memory offset).
    pub virtual_address: u64,
    /// In-file offset.
    pub offset: u64,
    /// Section size.
    pub size: u64,
    /// Optional index of the related section.
    pub link: u32,
    /// Extra information. Depends on the section type.
    pub info: u32,
    /// Alignment.
    pub align: u64,
    /// The size of one entry, for sections holding a table.
    pub entry_len: u64,
}

impl EntityIo for Section {
    fn read<R: ElfRead>(
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
    ) -> Result<Self, Error> {
        let name_offset = reader.read_u32(byte_order)?;
        let kind: SectionKind = reader.read_u32(byte_order)?.into();
        let flags = reader.read_word(class, byte_order)?;
        let virtual_address = reader.read_word(class, byte_order)?;
        let offset = reader.read_word(class, byte_order)?;
        let size = reader.read_word(class, byte_order)?;
        let link = reader.read_u32(byte_order)?;
        let info = reader.read_u32(byte_order)?;
        let align = reader.read_word(class, byte_order)?;
        let entry_len = reader.read_word(class, byte_order)?;
        Ok(Self {
            name_offset,
            kind,
            flags,
            virtual_address,
            offset,
            size,
            link,
            info,
            align,
            entry_len,
        })
    }
}

impl Section {
    /// Read section contents as bytes (or another [`BlockRead`] type).
    pub fn read_content<R: ElfRead + ElfSeek, T: BlockRead>(
        &self,
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
    ) -> Result<T, Error> {
        reader.seek(self.offset)?;
        T::read(reader, class, byte_order, self.size)
    }

    /// Virtual address range.
    pub const fn virtual_address_range(&self) -> Range<u64> {
        let start = self.virtual_address;
        let end = start + self.size;
        start..end
    }

    /// In-file location of the section.
    pub const fn file_offset_range(&self) -> Range<u64> {
        if matches!(self.kind, SectionKind::NoBits) {
            return self.offset..self.offset;
        }
        let start = self.offset;
        let end = start + self.size;
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_dynamic_section_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7_u32.to_le_bytes()); // name offset
        bytes.extend_from_slice(&SectionKind::Dynamic.as_u32().to_le_bytes());
        bytes.extend_from_slice(&3_u64.to_le_bytes()); // flags: WRITE|ALLOC
        bytes.extend_from_slice(&0x3df0_u64.to_le_bytes()); // vaddr
        bytes.extend_from_slice(&0x2df0_u64.to_le_bytes()); // offset
        bytes.extend_from_slice(&0x200_u64.to_le_bytes()); // size
        bytes.extend_from_slice(&5_u32.to_le_bytes()); // link
        bytes.extend_from_slice(&0_u32.to_le_bytes()); // info
        bytes.extend_from_slice(&8_u64.to_le_bytes()); // align
        bytes.extend_from_slice(&16_u64.to_le_bytes()); // entry size
        let section =
            Section::read(&mut Cursor::new(bytes), Class::Elf64, ByteOrder::LittleEndian).unwrap();
        assert_eq!(section.kind, SectionKind::Dynamic);
        assert_eq!(section.link, 5);
        assert_eq!(section.size, 0x200);
    }
}
