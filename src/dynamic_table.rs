use crate::BlockRead;
use crate::ByteOrder;
use crate::Class;
use crate::DynamicTag;
use crate::ElfRead;
use crate::Error;

/// The `.dynamic` section: a sequence of tag/value pairs consumed by the dynamic linker.
#[derive(Debug, Default)]
pub struct DynamicTable {
    entries: Vec<(DynamicTag, u64)>,
}

impl BlockRead for DynamicTable {
    fn read<R: ElfRead>(
        reader: &mut R,
        class: Class,
        byte_order: ByteOrder,
        len: u64,
    ) -> Result<Self, Error> {
        let word_len = class.word_len() as u64;
        let step = 2 * word_len;
        let n = len / step;
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let tag: DynamicTag = reader.read_word(class, byte_order)?.try_into()?;
            let value = reader.read_word(class, byte_order)?;
            let is_null = tag == DynamicTag::Null;
            entries.push((tag, value));
            if is_null {
                break;
            }
        }
        Ok(Self { entries })
    }
}

impl DynamicTable {
    /// The value of the first entry tagged `kind`, if any.
    pub fn get(&self, kind: DynamicTag) -> Option<u64> {
        self.entries
            .iter()
            .find_map(|(k, value)| (*k == kind).then_some(*value))
    }

    /// All values tagged `kind`, in table order.
    pub fn get_all(&self, kind: DynamicTag) -> impl Iterator<Item = u64> + '_ {
        self.entries
            .iter()
            .filter_map(move |(k, value)| (*k == kind).then_some(*value))
    }

    /// Iterate over every tag/value pair.
    pub fn iter(&self) -> impl Iterator<Item = (DynamicTag, u64)> + '_ {
        self.entries.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_needed_and_soname() {
        let mut bytes = Vec::new();
        for (tag, value) in [
            (DynamicTag::Needed, 0x10_u64),
            (DynamicTag::SharedObjectName, 0x20),
            (DynamicTag::Needed, 0x30),
            (DynamicTag::Null, 0),
        ] {
            bytes.extend_from_slice(&tag.as_u32().to_le_bytes());
            bytes.extend_from_slice(&[0_u8; 4]);
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let table = DynamicTable::read(
            &mut Cursor::new(bytes),
            Class::Elf64,
            ByteOrder::LittleEndian,
            64,
        )
        .unwrap();
        assert_eq!(table.get(DynamicTag::SharedObjectName), Some(0x20));
        assert_eq!(
            table.get_all(DynamicTag::Needed).collect::<Vec<_>>(),
            vec![0x10, 0x30]
        );
    }
}
