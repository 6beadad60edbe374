use core::ops::Deref;

use crate::BlockRead;
use crate::ByteOrder;
use crate::Class;
use crate::ElfRead;
use crate::EntityIo;
use crate::Error;
use crate::SymbolBinding;
use crate::SymbolKind;

/// A symbol table entry.
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Symbol {
    /// Symbol value (address).
    pub address: u64,
    /// Symbol size.
    pub size: u64,
    /// Offset of the symbol's name in the associated string table.
    pub name_offset: u32,
    /// Index of the section the symbol is defined in, or `SHN_UNDEF` (0) if undefined.
    pub section_index: u16,
    /// Binding and type, packed.
    pub info: u8,
    /// Visibility, packed.
    pub other: u8,
}

impl Symbol {
    /// `true` if the symbol is undefined in this file (its definition is expected
    /// to come from one of the needed libraries).
    pub const fn is_undefined(&self) -> bool {
        self.section_index == 0
    }

    /// Symbol binding (local/global/weak).
    pub fn binding(&self) -> SymbolBinding {
        SymbolBinding::from_info(self.info)
    }

    /// Symbol type (function/object/...).
    pub fn kind(&self) -> SymbolKind {
        SymbolKind::from_info(self.info)
    }
}

impl EntityIo for Symbol {
    fn read<R: ElfRead>(
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
    ) -> Result<Self, Error> {
        let name_offset = reader.read_u32(byte_order)?;
        match class {
            Class::Elf32 => {
                let address = reader.read_word(class, byte_order)?;
                let size = reader.read_u32(byte_order)? as u64;
                let info = reader.read_u8()?;
                let other = reader.read_u8()?;
                let section_index = reader.read_u16(byte_order)?;
                Ok(Self {
                    name_offset,
                    address,
                    size,
                    section_index,
                    info,
                    other,
                })
            }
            Class::Elf64 => {
                let info = reader.read_u8()?;
                let other = reader.read_u8()?;
                let section_index = reader.read_u16(byte_order)?;
                let address = reader.read_word(class, byte_order)?;
                let size = reader.read_u64(byte_order)?;
                Ok(Self {
                    name_offset,
                    address,
                    size,
                    section_index,
                    info,
                    other,
                })
            }
        }
    }
}

/// Symbol table (`.dynsym` or `.symtab`).
#[derive(Default, Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct SymbolTable {
    entries: Vec<Symbol>,
}

impl BlockRead for SymbolTable {
    fn read<R: ElfRead>(
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
        len: u64,
    ) -> Result<Self, Error> {
        let mut entries = Vec::new();
        let symbol_len = class.symbol_len();
        for _ in 0..len / symbol_len as u64 {
            let symbol = Symbol::read(reader, class, byte_order)?;
            entries.push(symbol);
        }
        Ok(Self { entries })
    }
}

impl Deref for SymbolTable {
    type Target = Vec<Symbol>;
    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_undefined_symbol() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5_u32.to_le_bytes()); // name offset
        bytes.push(SymbolBinding::Global.to_info_bits() | SymbolKind::Function.to_info_bits());
        bytes.push(0); // other
        bytes.extend_from_slice(&0_u16.to_le_bytes()); // section index: SHN_UNDEF
        bytes.extend_from_slice(&0_u64.to_le_bytes()); // address
        bytes.extend_from_slice(&0_u64.to_le_bytes()); // size
        let symbol =
            Symbol::read(&mut Cursor::new(bytes), Class::Elf64, ByteOrder::LittleEndian).unwrap();
        assert!(symbol.is_undefined());
        assert_eq!(symbol.binding(), SymbolBinding::Global);
        assert_eq!(symbol.kind(), SymbolKind::Function);
    }
}
