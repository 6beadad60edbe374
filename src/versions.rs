//! GNU symbol versioning: `.gnu.version_r` (version requirements) and
//! `.gnu.version` (the per-symbol version index table).

use core::cmp::Ordering;

use crate::constants::*;
use crate::ByteOrder;
use crate::Error;

/// A parsed GNU symbol version token, e.g. `GLIBC_2.34` or `ZLIB_1.2.3.1`.
///
/// Ordered by group name first (`GLIBC`, `GLIBCXX`, `CXXABI`, `GCC`, ...), then by
/// the dotted numeric suffix component-by-component, the way the dynamic linker and
/// `ld.so`-style version scripts compare them. This lets a policy express "at most
/// `GLIBC_2.17`" and have every higher requirement, however many dot components it
/// has, compare greater.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolVersion {
    raw: String,
}

impl SymbolVersion {
    /// Parse a version token as it appears in `.gnu.version_r`, e.g. `"GLIBC_2.34"`.
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The full token, e.g. `"GLIBC_2.34"`.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The version group, e.g. `"GLIBC"` out of `"GLIBC_2.34"`.
    ///
    /// Falls back to the whole token when there's no underscore, which happens for
    /// some vendor-specific version names.
    pub fn group(&self) -> &str {
        self.raw.split_once('_').map_or(self.raw.as_str(), |(g, _)| g)
    }

    fn dotted_suffix(&self) -> &str {
        self.raw.split_once('_').map_or("", |(_, s)| s)
    }
}

impl core::fmt::Display for SymbolVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialOrd for SymbolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SymbolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.group().cmp(other.group()) {
            Ordering::Equal => compare_dotted(self.dotted_suffix(), other.dotted_suffix()),
            order => order,
        }
    }
}

/// Compare two dot-separated version suffixes component-by-component, numerically
/// where both components parse as integers and lexicographically otherwise.
fn compare_dotted(a: &str, b: &str) -> Ordering {
    let mut a_parts = a.split('.');
    let mut b_parts = b.split('.');
    loop {
        return match (a_parts.next(), b_parts.next()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(x), Ok(y)) => match x.cmp(&y) {
                    Ordering::Equal => continue,
                    order => order,
                },
                _ => match x.cmp(y) {
                    Ordering::Equal => continue,
                    order => order,
                },
            },
        };
    }
}

/// One `Elf32_Vernaux`/`Elf64_Vernaux` record resolved to raw string-table offsets.
///
/// `versym_index` is the value that appears in the parallel `.gnu.version` array for
/// symbols that require this particular version.
struct RawVernaux {
    versym_index: u16,
    library_name_offset: u32,
    version_name_offset: u32,
}

/// Parse the linked list of `Elf32_Verneed`/`Elf64_Verneed` records (and their nested
/// `Vernaux` records) out of the raw content of a `.gnu.version_r` section.
///
/// The record layout is identical on 32-bit and 64-bit ELF, and offsets within it are
/// always relative byte offsets into `content`, not file offsets.
fn read_verneed(content: &[u8], byte_order: ByteOrder) -> Result<Vec<RawVernaux>, Error> {
    let mut entries = Vec::new();
    let mut verneed_offset = 0_usize;
    loop {
        let record = content
            .get(verneed_offset..verneed_offset + VERNEED_LEN)
            .ok_or(Error::MalformedElf("truncated Verneed record"))?;
        let aux_count = read_u16(record, 2, byte_order)?;
        let file_name_offset = read_u32(record, 4, byte_order)?;
        let aux_offset = read_u32(record, 8, byte_order)?;
        let next_offset = read_u32(record, 12, byte_order)?;

        let mut vernaux_offset = verneed_offset + aux_offset as usize;
        for _ in 0..aux_count {
            let aux = content
                .get(vernaux_offset..vernaux_offset + VERNAUX_LEN)
                .ok_or(Error::MalformedElf("truncated Vernaux record"))?;
            let versym_index = read_u16(aux, 6, byte_order)? & !VERSYM_HIDDEN;
            let version_name_offset = read_u32(aux, 8, byte_order)?;
            let aux_next = read_u32(aux, 12, byte_order)?;
            entries.push(RawVernaux {
                versym_index,
                library_name_offset: file_name_offset,
                version_name_offset,
            });
            if aux_next == 0 {
                break;
            }
            vernaux_offset += aux_next as usize;
        }

        if next_offset == 0 {
            break;
        }
        verneed_offset += next_offset as usize;
    }
    Ok(entries)
}

/// One resolved entry of a `.gnu.version_r` section: which library introduces which
/// version, and under which `.gnu.version` index.
pub struct VersionRequirement {
    /// Index into the parallel `.gnu.version` array.
    pub versym_index: u16,
    /// The soname of the library this version requirement refers to, e.g. `libz.so.1`.
    pub library: String,
    /// The version token itself, e.g. `ZLIB_1.2.9`.
    pub version: SymbolVersion,
}

/// Parse `.gnu.version_r` content, resolving string-table offsets via `dynstr`.
pub fn read_version_requirements(
    content: &[u8],
    byte_order: ByteOrder,
    dynstr: &crate::StringTable,
) -> Result<Vec<VersionRequirement>, Error> {
    let raw = read_verneed(content, byte_order)?;
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        let library = dynstr
            .get_str(entry.library_name_offset as usize)
            .ok_or(Error::MalformedElf("Verneed library name offset"))?
            .to_owned();
        let version = dynstr
            .get_str(entry.version_name_offset as usize)
            .ok_or(Error::MalformedElf("Vernaux version name offset"))?;
        out.push(VersionRequirement {
            versym_index: entry.versym_index,
            library,
            version: SymbolVersion::new(version),
        });
    }
    Ok(out)
}

/// Parse `.gnu.version` content: one `u16` version index per `.dynsym` entry, in order.
///
/// The high bit ([`VERSYM_HIDDEN`]) marks the symbol as not exported at link time and
/// is masked off here; callers that care about hiddenness should inspect the section
/// bytes directly.
pub fn read_version_symbols(content: &[u8], byte_order: ByteOrder) -> Result<Vec<u16>, Error> {
    let mut out = Vec::with_capacity(content.len() / 2);
    let mut offset = 0;
    while offset + 2 <= content.len() {
        out.push(read_u16(content, offset, byte_order)? & !VERSYM_HIDDEN);
        offset += 2;
    }
    Ok(out)
}

fn read_u16(bytes: &[u8], offset: usize, byte_order: ByteOrder) -> Result<u16, Error> {
    let raw: [u8; 2] = bytes
        .get(offset..offset + 2)
        .ok_or(Error::MalformedElf("truncated version record field"))?
        .try_into()
        .expect("slice of length 2");
    Ok(match byte_order {
        ByteOrder::LittleEndian => u16::from_le_bytes(raw),
        ByteOrder::BigEndian => u16::from_be_bytes(raw),
    })
}

fn read_u32(bytes: &[u8], offset: usize, byte_order: ByteOrder) -> Result<u32, Error> {
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .ok_or(Error::MalformedElf("truncated version record field"))?
        .try_into()
        .expect("slice of length 4");
    Ok(match byte_order {
        ByteOrder::LittleEndian => u32::from_le_bytes(raw),
        ByteOrder::BigEndian => u32::from_be_bytes(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_dotted_versions_within_a_group() {
        assert!(SymbolVersion::new("GLIBC_2.4") < SymbolVersion::new("GLIBC_2.17"));
        assert!(SymbolVersion::new("GLIBC_2.17") < SymbolVersion::new("GLIBC_2.34"));
        assert_eq!(
            SymbolVersion::new("GLIBC_2.17"),
            SymbolVersion::new("GLIBC_2.17")
        );
    }

    #[test]
    fn orders_groups_before_suffix() {
        assert!(SymbolVersion::new("CXXABI_1.3.9") < SymbolVersion::new("GCC_3.0"));
    }

    #[test]
    fn parses_single_verneed_with_two_vernaux() {
        let byte_order = ByteOrder::LittleEndian;
        let mut content = Vec::new();
        // Verneed: version=1, cnt=2, file=1 (".dynstr" offset placeholder), aux=16, next=0
        content.extend_from_slice(&1_u16.to_le_bytes());
        content.extend_from_slice(&2_u16.to_le_bytes());
        content.extend_from_slice(&1_u32.to_le_bytes());
        content.extend_from_slice(&16_u32.to_le_bytes());
        content.extend_from_slice(&0_u32.to_le_bytes());
        // Vernaux #1: hash=0, flags=0, other=2, name=11, next=16
        content.extend_from_slice(&0_u32.to_le_bytes());
        content.extend_from_slice(&0_u16.to_le_bytes());
        content.extend_from_slice(&2_u16.to_le_bytes());
        content.extend_from_slice(&11_u32.to_le_bytes());
        content.extend_from_slice(&16_u32.to_le_bytes());
        // Vernaux #2: hash=0, flags=0, other=3, name=21, next=0
        content.extend_from_slice(&0_u32.to_le_bytes());
        content.extend_from_slice(&0_u16.to_le_bytes());
        content.extend_from_slice(&3_u16.to_le_bytes());
        content.extend_from_slice(&21_u32.to_le_bytes());
        content.extend_from_slice(&0_u32.to_le_bytes());

        let raw = read_verneed(&content, byte_order).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].versym_index, 2);
        assert_eq!(raw[1].versym_index, 3);
    }

    #[test]
    fn masks_hidden_bit_from_versym() {
        let byte_order = ByteOrder::LittleEndian;
        let mut content = Vec::new();
        content.extend_from_slice(&0_u16.to_le_bytes());
        content.extend_from_slice(&(2_u16 | VERSYM_HIDDEN).to_le_bytes());
        let versyms = read_version_symbols(&content, byte_order).unwrap();
        assert_eq!(versyms, vec![0, 2]);
    }
}
