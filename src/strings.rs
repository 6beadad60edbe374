use core::ffi::CStr;

use crate::BlockRead;
use crate::ByteOrder;
use crate::Class;
use crate::ElfRead;
use crate::Error;

/// A table that stores NUL-terminated strings.
///
/// Used for `.shstrtab` (section names), `.dynstr` (symbol and library names) and `.strtab`.
#[cfg_attr(test, derive(Debug, PartialEq, Eq))]
pub struct StringTable(Vec<u8>);

impl StringTable {
    /// Get a reference to a string at `offset`.
    ///
    /// Returns `None` if the offset is out-of-bounds.
    pub fn get_string(&self, offset: usize) -> Option<&CStr> {
        let c_str_bytes = self.0.get(offset..)?;
        CStr::from_bytes_until_nul(c_str_bytes).ok()
    }

    /// Like [`get_string`](Self::get_string), but returns `&str` if the string is valid UTF-8.
    pub fn get_str(&self, offset: usize) -> Option<&str> {
        self.get_string(offset)?.to_str().ok()
    }

    /// Read the table from the `reader`.
    pub fn read(reader: &mut impl ElfRead, len: u64) -> Result<Self, Error> {
        let mut strings = vec![0_u8; len as usize];
        reader.read_bytes(&mut strings[..])?;
        Ok(Self(strings))
    }
}

impl BlockRead for StringTable {
    fn read<R: ElfRead>(
        reader: &mut R,
        _class: Class,
        _byte_order: ByteOrder,
        len: u64,
    ) -> Result<Self, Error> {
        StringTable::read(reader, len)
    }
}

impl AsRef<[u8]> for StringTable {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn looks_up_strings_by_offset() {
        let bytes = b"\0libz.so.1\0libc.so.6\0".to_vec();
        let table = StringTable::read(&mut Cursor::new(bytes.clone()), bytes.len() as u64).unwrap();
        assert_eq!(table.get_str(1), Some("libz.so.1"));
        assert_eq!(table.get_str(11), Some("libc.so.6"));
        assert_eq!(table.get_string(1000), None);
    }
}
